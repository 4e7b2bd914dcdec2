use clap::Parser;
use commands::{Command, DatabaseCommand, Opts, ServiceCommand};
use config::Config;
use ord420::cache::TwoTierCache;
use ord420::gateway::GatewayClient;
use ord420::logging::Context;
use ord420::scheduler::Driver;
use ord420::store::Store;
use ord420::{metrics, try_info};
use std::process;

mod commands;

fn confirm_reset(db_path: &str) -> Result<(), String> {
    println!("This will drop every table in {db_path}. Confirm? [Y/n]");
    let mut buffer = String::new();
    std::io::stdin().read_line(&mut buffer).unwrap();
    if buffer.starts_with('n') {
        return Err("reset aborted".to_string());
    }
    Ok(())
}

pub fn main() {
    let logger = hiro_system_kit::log::setup_logger();
    let _guard = hiro_system_kit::log::setup_global_logger(logger.clone());
    let ctx = Context {
        logger: Some(logger),
        tracer: false,
    };

    let opts = match Opts::try_parse() {
        Ok(opts) => opts,
        Err(e) => {
            println!("{e}");
            process::exit(1);
        }
    };

    if let Err(e) = hiro_system_kit::nestable_block_on(handle_command(opts, &ctx)) {
        error!(ctx.expect_logger(), "{e}");
        std::thread::sleep(std::time::Duration::from_millis(500));
        process::exit(1);
    }
}

async fn handle_command(opts: Opts, ctx: &Context) -> Result<(), String> {
    match opts.command {
        Command::Database(DatabaseCommand::Migrate(_)) => {
            let config = Config::from_env()?;
            Store::open(&config.storage.db_path).map_err(|e| e.to_string())?;
            try_info!(ctx, "database migrated at {}", config.storage.db_path);
            Ok(())
        }
        Command::Database(DatabaseCommand::Reset(cmd)) => {
            let config = Config::from_env()?;
            if !cmd.yes {
                confirm_reset(&config.storage.db_path)?;
            }
            let store = Store::open(&config.storage.db_path).map_err(|e| e.to_string())?;
            store.reset().await.map_err(|e| e.to_string())?;
            try_info!(ctx, "database reset at {}", config.storage.db_path);
            Ok(())
        }
        Command::Service(ServiceCommand::Start(cmd)) => {
            let config = Config::from_env()?;
            let store = Store::open(&config.storage.db_path).map_err(|e| e.to_string())?;
            let cache = TwoTierCache::new(&config.cache).await;
            let gateway = GatewayClient::new(config.gateway.clone());
            let mut driver = Driver::bootstrap(gateway, store, cache, config.clone())
                .await
                .map_err(|e| e.to_string())?;

            try_info!(ctx, "starting from height {}", driver.current_height());

            if !cmd.no_metrics {
                if let Some(port) = config.network.prometheus_port {
                    let metrics_handle = driver.metrics();
                    let metrics_ctx = ctx.clone();
                    tokio::spawn(async move {
                        if let Err(e) = metrics::start_serving_metrics(metrics_handle, port, &metrics_ctx).await {
                            error!(metrics_ctx.expect_logger(), "metrics server stopped: {e}");
                        }
                    });
                }
            }

            driver.run(ctx).await;
            Ok(())
        }
    }
}
