use crate::{
    cli::VerificationMode,
    metrics::utils::format_latency,
    trial::{TrialOutcome, TrialReport},
    utils::{format_duration, format_message_rate, print_table_row, print_table_separator},
};
use anyhow::{Context, Result};
use colored::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A trial that ended in an error instead of an outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialFailure {
    pub mode: VerificationMode,
    pub trial: usize,
    pub error: String,
}

/// System information for reproducibility
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemInfo {
    pub os: String,
    pub architecture: String,
    pub cpu_cores: usize,
    pub benchmark_version: String,
}

/// Aggregates for all trials of one verification mode
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeSummary {
    pub mode: VerificationMode,
    pub trials: usize,
    pub completed: usize,
    pub cut_off: usize,
    pub failed: usize,
    pub mean_sent: f64,
    /// Mean trial result; what it counts depends on the mode, see `result_meaning`
    pub mean_result: f64,
    pub result_meaning: String,
    pub mean_messages_per_second: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run_id: String,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub system_info: SystemInfo,
}

/// Everything written to the results file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalResults {
    pub metadata: RunMetadata,
    pub reports: Vec<TrialReport>,
    pub failures: Vec<TrialFailure>,
    pub summary: Vec<ModeSummary>,
}

/// Collects trial reports and writes them out at the end of a run
pub struct ResultsManager {
    run_id: String,
    output_file: Option<PathBuf>,
    reports: Vec<TrialReport>,
    failures: Vec<TrialFailure>,
}

impl ResultsManager {
    /// Create a results manager; nothing is written when `output_file` is `None`
    pub fn new(output_file: Option<&Path>) -> Self {
        Self {
            run_id: crate::utils::generate_run_id(),
            output_file: output_file.map(Path::to_path_buf),
            reports: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn add_report(&mut self, report: TrialReport) {
        debug!(
            "Recording {} trial {} ({:?})",
            report.config.mode, report.trial, report.outcome
        );
        self.reports.push(report);
    }

    pub fn add_failure(&mut self, mode: VerificationMode, trial: usize, error: &anyhow::Error) {
        self.failures.push(TrialFailure {
            mode,
            trial,
            error: format!("{:#}", error),
        });
    }

    /// Per-mode aggregates in first-seen order
    pub fn summarize(&self) -> Vec<ModeSummary> {
        let mut modes: Vec<VerificationMode> = Vec::new();
        for mode in self
            .reports
            .iter()
            .map(|r| r.config.mode)
            .chain(self.failures.iter().map(|f| f.mode))
        {
            if !modes.contains(&mode) {
                modes.push(mode);
            }
        }

        modes
            .into_iter()
            .map(|mode| {
                let reports: Vec<&TrialReport> =
                    self.reports.iter().filter(|r| r.config.mode == mode).collect();
                let failed = self.failures.iter().filter(|f| f.mode == mode).count();
                let cut_off = reports.iter().filter(|r| r.outcome.is_cut_off()).count();
                let mean = |f: &dyn Fn(&TrialReport) -> f64| {
                    if reports.is_empty() {
                        0.0
                    } else {
                        reports.iter().map(|r| f(r)).sum::<f64>() / reports.len() as f64
                    }
                };

                ModeSummary {
                    mode,
                    trials: reports.len() + failed,
                    completed: reports.len() - cut_off,
                    cut_off,
                    failed,
                    mean_sent: mean(&|r| r.outcome.sent() as f64),
                    mean_result: mean(&|r| r.outcome.count() as f64),
                    result_meaning: mode.result_description().to_string(),
                    mean_messages_per_second: mean(&|r| {
                        r.send_metrics.throughput.messages_per_second
                    }),
                }
            })
            .collect()
    }

    /// Write the results file (if configured) and print the summary table
    pub fn finalize(&self) -> Result<()> {
        info!("Finalizing benchmark results");

        if let Some(ref output_file) = self.output_file {
            self.write_final_results(output_file)?;
            info!("Results written to: {:?}", output_file);
        }

        self.print_summary();
        Ok(())
    }

    fn write_final_results(&self, output_file: &Path) -> Result<()> {
        let final_results = FinalResults {
            metadata: RunMetadata {
                run_id: self.run_id.clone(),
                version: crate::VERSION.to_string(),
                timestamp: chrono::Utc::now(),
                system_info: Self::get_system_info(),
            },
            reports: self.reports.clone(),
            failures: self.failures.clone(),
            summary: self.summarize(),
        };

        let json = serde_json::to_string_pretty(&final_results)?;
        std::fs::write(output_file, json)
            .with_context(|| format!("Failed to write results to {:?}", output_file))?;
        Ok(())
    }

    fn print_summary(&self) {
        let widths = [6, 14, 5, 7, 9, 12, 10, 14];
        println!();
        print_table_separator(&widths);
        print_table_row(
            &[
                "Trial", "Mode", "Sent", "Result", "Status", "Send time", "p50", "Rate",
            ],
            &widths,
        );
        print_table_separator(&widths);

        for report in &self.reports {
            let status = match &report.outcome {
                TrialOutcome::CutOff { .. } => "cut off",
                TrialOutcome::Delivered { sent, delivered } if delivered < sent => "partial",
                _ => "ok",
            };
            let p50 = report
                .send_metrics
                .latency
                .as_ref()
                .map(|l| format_latency(l.median_ns as u64))
                .unwrap_or_else(|| "-".to_string());

            print_table_row(
                &[
                    &report.trial.to_string(),
                    &report.config.mode.to_string(),
                    &report.outcome.sent().to_string(),
                    &report.outcome.count().to_string(),
                    status,
                    &format_duration(report.send_duration),
                    &p50,
                    &format_message_rate(report.send_metrics.throughput.messages_per_second),
                ],
                &widths,
            );
        }
        print_table_separator(&widths);

        for summary in self.summarize() {
            println!("{} result: {}", summary.mode, summary.result_meaning);
        }

        for failure in &self.failures {
            println!(
                "{}",
                format!(
                    "{} trial {} failed: {}",
                    failure.mode, failure.trial, failure.error
                )
                .red()
            );
        }
    }

    fn get_system_info() -> SystemInfo {
        SystemInfo {
            os: std::env::consts::OS.to_string(),
            architecture: std::env::consts::ARCH.to_string(),
            cpu_cores: num_cpus::get(),
            benchmark_version: crate::VERSION.to_string(),
        }
    }
}
