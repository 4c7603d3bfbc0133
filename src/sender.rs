//! # Budgeted Serial Sender
//!
//! Transmits a workload through one peer's [`SendingEndpoint`], strictly one
//! message at a time, under a wall-clock budget.
//!
//! ## Cut-off Policy
//!
//! The budget is checked after every completed send (and notify, when
//! enabled), never during a call. When the elapsed time since the start of
//! the loop has reached the budget, the loop stops and reports `i + 1`
//! messages: the message whose send pushed the trial over the budget is
//! counted as sent. A slow call can therefore overshoot the budget by up to
//! its own duration, and a zero budget always sends exactly one message.
//!
//! ## Failures
//!
//! Any error from the endpoint aborts the loop and is returned to the
//! caller with the failing message index attached. Nothing is retried.

use crate::{
    events::{TrialEvent, TrialObserver},
    metrics::{MetricsCollector, SendMetrics},
    peer::{Channel, SendingEndpoint},
    workload::Workload,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Wall-clock budget of a trial
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialBudget {
    period: Duration,
}

impl TrialBudget {
    pub fn new(period: Duration) -> Self {
        Self { period }
    }

    pub fn from_millis(period_millis: u64) -> Self {
        Self::new(Duration::from_millis(period_millis))
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Whether `elapsed` has used up the budget
    pub fn is_exhausted(&self, elapsed: Duration) -> bool {
        elapsed >= self.period
    }
}

/// What the sender managed to do
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendOutcome {
    pub requested: usize,
    pub sent: usize,
    pub elapsed: Duration,
    pub metrics: SendMetrics,
}

impl SendOutcome {
    /// True when the whole workload went out within the budget
    pub fn is_complete(&self) -> bool {
        self.sent == self.requested
    }
}

/// Sends a workload serially under a [`TrialBudget`]
pub struct BudgetedSender<'a> {
    budget: TrialBudget,
    percentiles: Vec<f64>,
    observer: &'a dyn TrialObserver,
}

impl<'a> BudgetedSender<'a> {
    pub fn new(budget: TrialBudget, observer: &'a dyn TrialObserver) -> Self {
        Self {
            budget,
            percentiles: crate::defaults::PERCENTILES.to_vec(),
            observer,
        }
    }

    /// Percentiles reported for per-send latency
    pub fn with_percentiles(mut self, percentiles: Vec<f64>) -> Self {
        self.percentiles = percentiles;
        self
    }

    /// Send `count` messages on `channel` through `endpoint`
    ///
    /// When `notify` is set, every acknowledged message is additionally
    /// broadcast with [`SendingEndpoint::notify`] before the next one is
    /// generated.
    pub async fn send_serially<E>(
        &self,
        endpoint: &E,
        channel: &Channel,
        count: usize,
        notify: bool,
    ) -> Result<SendOutcome>
    where
        E: SendingEndpoint + ?Sized,
    {
        let start = Instant::now();
        let mut metrics = MetricsCollector::new(start, self.percentiles.clone())?;

        for message in Workload::new(channel.clone(), count) {
            let index = message.sequence_index;
            self.observer.on_event(&TrialEvent::Sending { index });

            let call_start = Instant::now();
            let record = endpoint
                .send(&message)
                .await
                .with_context(|| format!("Failed to send message {}", index))?;
            let latency = call_start.elapsed();
            metrics.record_message(message.size(), latency)?;
            self.observer
                .on_event(&TrialEvent::MessageSent { index, latency });

            if notify {
                let receipt = endpoint
                    .notify(&record, channel)
                    .await
                    .with_context(|| format!("Failed to signal message {}", index))?;
                self.observer
                    .on_event(&TrialEvent::NotificationSent { index, receipt });
            }

            let elapsed = start.elapsed();
            let sent = index + 1;
            if sent < count && self.budget.is_exhausted(elapsed) {
                self.observer.on_event(&TrialEvent::BudgetExhausted {
                    sent,
                    requested: count,
                    elapsed,
                });
                return Ok(SendOutcome {
                    requested: count,
                    sent,
                    elapsed,
                    metrics: metrics.get_metrics(),
                });
            }
        }

        let elapsed = start.elapsed();
        self.observer.on_event(&TrialEvent::SendCompleted {
            sent: count,
            elapsed,
        });
        Ok(SendOutcome {
            requested: count,
            sent: count,
            elapsed,
            metrics: metrics.get_metrics(),
        })
    }
}
