#[cfg(feature = "jemalloc")]
use tikv_jemallocator::Jemalloc;
#[cfg(feature = "jemalloc")]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::path::PathBuf;

use clap::Parser;

use sniper_engine::bridge::BridgeGateway;
use sniper_engine::config::EngineConfig;
use sniper_engine::controller::{Controller, SystemClock};
use sniper_engine::news::news_from_config;
use sniper_engine::stats::TradeStatistics;
use sniper_engine::status::StatusFile;
use sniper_engine::telegram::notifier_from_config;

#[derive(Parser, Debug)]
#[command(name = "sniper_engine", version, about = "Single-instrument trading engine")]
struct Cli {
    /// Path to the JSON configuration file.
    #[arg(default_value = "config.json")]
    config: PathBuf,

    /// Validate the configuration, print the summary and exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let cfg = match EngineConfig::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            log::error!("[main] {}", e);
            return Err(e.into());
        }
    };
    cfg.log_summary();
    if cli.check {
        log::info!("[main] configuration OK");
        return Ok(());
    }

    let gateway = BridgeGateway::from_env(&cfg.broker, &cfg.trading.timeframe)?;
    let notifier = notifier_from_config(&cfg)?;
    let news = match news_from_config(&cfg.news) {
        Ok(n) => n,
        Err(e) => {
            log::warn!("[main] news filter unavailable, trading without it: {}", e);
            None
        }
    };
    let stats = TradeStatistics::load(&cfg.system.stats_file)?;
    log::info!("[main] {}", stats.summary());
    let status = StatusFile::new(&cfg.system);

    let controller = Controller::new(
        cfg,
        Box::new(gateway),
        notifier,
        news,
        Box::new(stats),
        Box::new(SystemClock),
    )?
    .with_status_file(status);

    let cause = controller
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("[main] cannot listen for ctrl-c: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await;
    log::info!("[main] exited: {:?}", cause);
    Ok(())
}
