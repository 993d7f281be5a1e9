use std::fs::File;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use daemonize::Daemonize;
use log::{LevelFilter, info};
use syslog::{BasicLogger, Facility, Formatter3164};

use coolctld::{app_context::AppState, application::Application, config::ConfigManager};

mod cli;

use cli::Cli;

fn init_log(level: LevelFilter) -> Result<()> {
    syslog::unix(Formatter3164 {
        facility: Facility::LOG_USER,
        hostname: None,
        process: "coolctld".into(),
        pid: std::process::id(),
    })
    .map_err(|e| anyhow!("{e}"))
    .and_then(|logger| {
        log::set_boxed_logger(Box::new(BasicLogger::new(logger)))
            .map(|()| log::set_max_level(level))
            .map_err(|e| anyhow!("{e}"))
    })
}

fn into_daemon() -> Result<()> {
    File::create("/var/tmp/coolctld.log")
        .and_then(|out| Ok((out.try_clone()?, out)))
        .map_err(|e| anyhow!("{e}"))
        .and_then(|(stderr, stdout)| {
            Daemonize::new()
                .stdout(stdout)
                .stderr(stderr)
                .start()
                .map_err(|e| anyhow!("{e}"))
        })
}

async fn run(cli: Cli) -> Result<()> {
    let config_manager = ConfigManager::load(cli.config).await?;
    init_log(config_manager.get().await.log_filter())?;
    info!(
        "coolctld {} starting with {}",
        env!("CARGO_PKG_VERSION"),
        config_manager.path().display()
    );

    if cli.once {
        let state = AppState::new(config_manager).await?;
        let report = state.startup(cli.apply.as_deref()).await?;
        println!("{}", report.summary());
        return Ok(());
    }

    Application::builder()
        .with_config_manager(config_manager)
        .with_startup_profile(cli.apply)
        .build()?
        .run()
        .await
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Fork before any runtime threads exist.
    if cli.daemonize {
        into_daemon()?;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start the async runtime")?;

    runtime.block_on(async {
        #[cfg(feature = "tokio-console")]
        console_subscriber::init();

        run(cli).await
    })
}
