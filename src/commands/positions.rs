//! Print tracked positions and how long they have been held

use anyhow::{Context, Result};
use chrono::Utc;

use ema_options_bot::store::{create_repository, PositionStore};
use ema_options_bot::Config;

pub fn run(config_path: String) -> Result<()> {
    let config = Config::from_file(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;

    let store = PositionStore::new(create_repository(&config.state.dir, config.state.backend)?);
    let positions = store.positions()?;

    if positions.is_empty() {
        println!("No open positions.");
        return Ok(());
    }

    let now = Utc::now();
    let threshold = config.strategy.holding_threshold_hours;

    println!("{:<24} {:<14} {:<26} {:>8}", "CONTRACT", "SIDE", "OPENED", "HELD");
    println!("{}", "-".repeat(75));
    for p in &positions {
        let held = p.hours_held(now);
        let marker = if held >= threshold { " (due)" } else { "" };
        println!(
            "{:<24} {:<14} {:<26} {:>7.2}h{}",
            p.contract_symbol,
            p.side.as_str(),
            p.opened_at.format("%Y-%m-%d %H:%M:%S UTC"),
            held,
            marker
        );
    }
    println!("{}", "-".repeat(75));
    println!("{} open, auto-close after {}h", positions.len(), threshold);

    Ok(())
}
