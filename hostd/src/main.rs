//! hostd - Entry Point
//!
//! Keeps the reverse proxy and the installed agents of a fleet of servers
//! in their intended state.

use std::collections::HashMap;
use std::env;

use hostd::app::options::AppOptions;
use hostd::app::run::run;
use hostd::logs::{init_logging, LogLevel, LogOptions};
use hostd::storage::layout::StorageLayout;
use hostd::storage::settings::Settings;
use hostd::utils::version_info;

use tracing::{error, info};

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    let version = version_info();
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version) {
            Ok(text) => println!("{}", text),
            Err(_) => println!("{}", version.version),
        }
        return;
    }

    let layout = match cli_args.get("base-dir") {
        Some(dir) => StorageLayout::new(dir),
        None => StorageLayout::default(),
    };
    if let Err(e) = layout.setup().await {
        eprintln!("Unable to create {}: {}", layout.base_dir.display(), e);
        return;
    }

    // Retrieve the settings file
    let settings = match Settings::load_or_init(&layout.settings_file()).await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Unable to read settings file: {}", e);
            return;
        }
    };

    // Validate and exit
    if cli_args.contains_key("check-config") {
        println!("Settings at {} are valid", layout.settings_file().path().display());
        return;
    }

    // Initialize logging
    let log_level = match cli_args.get("log-level").map(|s| s.parse::<LogLevel>()) {
        Some(Ok(level)) => level,
        Some(Err(e)) => {
            eprintln!("{}", e);
            return;
        }
        None => settings.log_level,
    };
    let log_options = LogOptions {
        log_level,
        json_format: settings.json_logs,
        log_dir: settings
            .file_logs
            .then(|| layout.logs_dir().path().to_path_buf()),
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            println!("Failed to initialize logging: {e}");
            None
        }
    };

    // Run the daemon
    let options = AppOptions::from_settings(layout, &settings);
    info!(version = %version.version, git_hash = %version.git_hash, "Running hostd with options: {:?}", options);
    if let Err(e) = run(options, await_shutdown_signal()).await {
        error!("Failed to run hostd: {e}");
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                _ => {
                    error!("Unable to install signal handlers, waiting for Ctrl+C only");
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Ctrl+C received, shutting down...");
    }
}
