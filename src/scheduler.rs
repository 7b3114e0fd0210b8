//! Fixed-interval cycle runner with cooperative shutdown

use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

use crate::engine::TradingEngine;

/// Run cycles every `period` until `shutdown` flips to true.
///
/// The first cycle starts immediately. A failed cycle is logged and the
/// loop carries on. Returns the number of cycles started.
pub async fn run_loop(
    engine: &mut TradingEngine,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> u64 {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut listening = true;
    let mut cycles = 0u64;

    info!("Starting trading loop ({}s interval)", period.as_secs());

    loop {
        if *shutdown.borrow() {
            break;
        }

        tokio::select! {
            biased;

            changed = shutdown.changed(), if listening => {
                if changed.is_err() {
                    // sender gone, nobody can stop us through the channel anymore
                    listening = false;
                }
            }
            _ = ticker.tick() => {
                cycles += 1;
                if let Err(e) = engine.run_cycle().await {
                    error!("Trading cycle error: {:#}", e);
                }
            }
        }
    }

    info!("Trading loop stopped after {} cycles", cycles);
    cycles
}
