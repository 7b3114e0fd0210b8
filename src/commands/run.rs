//! Run the trading loop (paper or brokerage orders)

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use ema_options_bot::broker::{AlpacaClient, OrderGateway, PaperOrderGateway, TradierClient};
use ema_options_bot::store::{create_repository, PositionStore};
use ema_options_bot::trade_log::CsvTradeLog;
use ema_options_bot::{scheduler, Config, TradingEngine};

pub fn run(config_path: String, paper: bool, once: bool) -> Result<()> {
    dotenv::dotenv().ok();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    runtime.block_on(run_async(config_path, paper, once))
}

async fn run_async(config_path: String, paper: bool, once: bool) -> Result<()> {
    let config = Config::from_file(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;

    let s = &config.strategy;
    info!("========================================================");
    info!("  EMA OPTIONS BOT - {} MODE", if paper { "PAPER" } else { "BROKER" });
    info!("  Symbol: {}", s.symbol);
    info!("  EMA: {} / {} on {} bars", s.fast_period, s.slow_period, s.bar_timeframe);
    info!("  Auto-close after: {}h", s.holding_threshold_hours);
    info!("  Cycle interval: {} seconds", s.poll_interval_secs);
    info!("========================================================");

    if !paper {
        warn!("Orders will be sent to {}", config.broker.base_url);
    }

    let mut engine = build_engine(&config, paper)?;

    if once {
        let report = engine.run_cycle().await?;
        info!("Single cycle finished: {}", report.outcome);
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, initiating shutdown...");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                error!("Error setting up signal handler: {}", e);
            }
        }
    });

    scheduler::run_loop(&mut engine, config.strategy.poll_interval(), shutdown_rx).await;

    info!("Trading session ended.");
    Ok(())
}

fn build_engine(config: &Config, paper: bool) -> Result<TradingEngine> {
    let client_config = config.broker.client_config();

    let price_feed = AlpacaClient::with_config(
        &config.price_feed.base_url,
        &config.price_feed.api_key,
        &config.price_feed.api_secret,
        client_config.clone(),
    )
    .context("Failed to create Alpaca client")?
    .with_feed(&config.price_feed.feed)
    .with_lookback_days(config.price_feed.lookback_days);

    let tradier = Arc::new(
        TradierClient::with_config(
            &config.broker.base_url,
            &config.broker.account_id,
            &config.broker.access_token,
            client_config,
        )
        .context("Failed to create Tradier client")?
        .with_quantity(config.strategy.order_quantity),
    );

    let orders: Box<dyn OrderGateway> = if paper {
        Box::new(PaperOrderGateway::new())
    } else {
        Box::new(tradier.clone())
    };

    let repo = create_repository(&config.state.dir, config.state.backend)?;
    let trade_log = CsvTradeLog::new(&config.state.trade_log)?;

    Ok(TradingEngine::new(
        config.strategy.clone(),
        Box::new(price_feed),
        Box::new(tradier),
        orders,
        PositionStore::new(repo),
        Box::new(trade_log),
    ))
}
