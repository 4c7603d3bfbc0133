//! # P2P Tx Bench - Main Entry Point
//!
//! 1. **Parse arguments** and initialize logging
//! 2. **Expand modes**: `both` becomes a poll run and a notification run
//! 3. **Run trials**: each trial gets a fresh in-process network so no state
//!    leaks between trials
//! 4. **Generate results**: write the JSON file and print the summary table
//!
//! By default the first failing trial aborts the run. With
//! `--continue-on-error` the failure is recorded and the remaining trials
//! still run.

use anyhow::Result;
use clap::Parser;
use p2p_tx_bench::{
    cli::{Args, VerificationMode},
    logging::init_logging,
    peer::{LocalNetwork, LocalProvisioner, PeerSettings},
    results::ResultsManager,
    trial::{TrialConfig, TrialRunner},
    utils::validate_trial_count,
};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Held until exit so the file writer flushes
    let _log_guard = init_logging(args.verbose, args.quiet, args.log_file.as_deref())?;

    info!("Starting P2P Tx Bench {}", p2p_tx_bench::VERSION);
    info!("Configuration: {:?}", args);

    validate_trial_count(args.trials)?;

    let mut results_manager = ResultsManager::new(args.output_file.as_deref());
    let settings = peer_settings(&args);

    for mode in VerificationMode::expand_all(args.modes.clone()) {
        let config = TrialConfig::from_args(&args, mode)?;

        for trial in 0..args.trials {
            info!("Running {} trial {}/{}", mode, trial + 1, args.trials);

            let provisioner = LocalProvisioner::new(LocalNetwork::new(), settings.clone());
            match TrialRunner::new(config.clone(), provisioner).run().await {
                Ok(mut report) => {
                    report.trial = trial;
                    results_manager.add_report(report);
                }
                Err(e) => {
                    error!("{} trial {} failed: {:#}", mode, trial, e);
                    if !args.continue_on_error {
                        return Err(e);
                    }
                    results_manager.add_failure(mode, trial, &e);
                }
            }
        }
    }

    results_manager.finalize()?;

    info!("P2P Tx Bench completed");
    Ok(())
}

fn peer_settings(args: &Args) -> PeerSettings {
    PeerSettings {
        send_latency: args.send_latency.unwrap_or_default(),
        jitter: args.jitter.unwrap_or_default(),
        gossip_delay: args.gossip_delay.unwrap_or_default(),
        ..PeerSettings::default()
    }
}
