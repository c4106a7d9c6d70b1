use std::{path::PathBuf, process::ExitCode};

use clap::Parser;
use imuflux::{
    config::{Config, DEFAULT_CONFIG_PATH},
    core::launch,
    logger::LoggerManager,
    print_error,
};
#[cfg(target_os = "linux")]
use imuflux::core::bridge;
#[cfg(not(target_os = "linux"))]
use imuflux::core::sensor;
use tracing::{debug, error, info};

#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Configuration file
    #[arg(
        short = 'c',
        long,
        env = "IMUFLUX_CONFIG",
        long_help = format!("Configuration file (default: {})", DEFAULT_CONFIG_PATH)
    )]
    config: Option<PathBuf>,
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        info!("Received Ctrl+C, initiating graceful shutdown...");
                    }
                    _ = terminate.recv() => {
                        info!("Received SIGTERM, initiating graceful shutdown...");
                    }
                }
                return;
            }
            Err(e) => error!("Cannot listen for SIGTERM: {}", e),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Cannot listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received Ctrl+C, initiating graceful shutdown...");
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let cfg = match Config::new(cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            print_error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut logger_manager = match LoggerManager::new(cfg.logger.clone()) {
        Ok(manager) => manager,
        Err(e) => {
            print_error!("Failed to setup Log Manager: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = logger_manager.init() {
        print_error!("Failed to init Log Manager: {}", e);
        return ExitCode::FAILURE;
    }

    info!("Starting imuflux version {}...", env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", cfg.logger.level);
    debug!(
        "MQTT broker {}:{} (TLS {})",
        cfg.mqtt.host,
        cfg.mqtt.port,
        if cfg.mqtt.tls.enabled { "on" } else { "off" }
    );

    #[cfg(target_os = "linux")]
    let open = bridge::bno055_opener(&cfg.imu);

    #[cfg(not(target_os = "linux"))]
    let open = {
        let bus = cfg.imu.bus_path().display().to_string();
        move || -> Result<Box<dyn sensor::ImuSource>, sensor::SensorError> {
            Err(sensor::SensorError::init(bus, "I2C access is only available on Linux"))
        }
    };

    match launch(cfg, open, shutdown_signal()).await {
        Ok(()) => {
            info!("Shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::from(e.exit_code())
        }
    }
}
