mod backup;
mod checksum;
mod config;
mod engine;
mod errors;
mod events;
mod filters;
mod http;
mod logging;
mod poller;
mod queue;
mod scanner;
mod stats;
mod validator;
mod watcher;
mod workspace;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::{Config, ConfigOverrides};
use engine::Engine;
use workspace::WorkspaceLock;

#[derive(Parser, Debug)]
#[command(name = "sitesync", version)]
struct Cli {
    /// Path to config file
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Local folder to keep in sync (takes precedence over env/config)
    #[arg(long = "sync-folder")]
    sync_folder: Option<PathBuf>,

    /// Account username override (takes precedence over env/config)
    #[arg(long = "username")]
    username: Option<String>,

    /// Server URL override (takes precedence over env/config)
    #[arg(long = "server")]
    server: Option<String>,

    /// API key override (takes precedence over env/config; never persisted)
    #[arg(long = "api-key")]
    api_key: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a config file for this account and sync folder
    Init,

    /// Run the sync engine until interrupted
    Start,

    /// Print current sync stats and recent errors, then exit
    Status,

    /// Print the resolved config file path
    ConfigPath,

    /// Print version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let Cli {
        config,
        sync_folder,
        username,
        server,
        api_key,
        command,
    } = Cli::parse();
    let resolved_config = Config::resolve_config_path(config.as_deref());

    let overrides = ConfigOverrides {
        sync_folder,
        username,
        server_url: server,
        api_key,
    };

    match command {
        Some(Commands::Init) => run_init(&resolved_config, overrides),
        Some(Commands::ConfigPath) => {
            println!("{}", resolved_config.display());
            Ok(())
        }
        Some(Commands::Version) => {
            println!("{}", detailed_version());
            Ok(())
        }
        Some(Commands::Status) => run_status(&resolved_config, overrides).await,
        Some(Commands::Start) | None => run_start(&resolved_config, overrides).await,
    }
}

fn run_init(config_path: &std::path::Path, overrides: ConfigOverrides) -> Result<()> {
    let cfg = Config::load_with_overrides(config_path, overrides)?;
    workspace::ensure_workspace_layout(&cfg.sync_folder)?;
    cfg.save()?;
    println!(
        "wrote {} (sync folder: {})",
        config_path.display(),
        cfg.sync_folder.display()
    );
    Ok(())
}

async fn run_start(config_path: &std::path::Path, overrides: ConfigOverrides) -> Result<()> {
    let cfg = Config::load_with_overrides(config_path, overrides)?;
    let Some(api_key) = cfg.api_key.clone() else {
        anyhow::bail!("api key not configured; pass --api-key or set SITESYNC_API_KEY");
    };

    let log_path = logging::init_default_log_file()?;
    logging::info(format!(
        "engine start version={} config={} log={}",
        env!("CARGO_PKG_VERSION"),
        config_path.display(),
        log_path.display()
    ));

    let _lock = WorkspaceLock::try_lock(&cfg.sync_folder).context("acquire workspace lock")?;

    let mut engine = Engine::new(&cfg.sync_folder, &cfg.server_url, &api_key)?
        .with_runtime_options(cfg.runtime.0);
    let mut events = engine.subscribe();

    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let Ok(json) = serde_json::to_string(&event) {
                println!("{json}");
            }
        }
    });

    engine.init(&cfg.username).await.context("init engine")?;
    logging::info("engine running");

    tokio::signal::ctrl_c().await.context("wait for ctrl-c")?;
    logging::info("engine stopping");
    engine.stop().await;
    Ok(())
}

async fn run_status(config_path: &std::path::Path, overrides: ConfigOverrides) -> Result<()> {
    let cfg = Config::load_with_overrides(config_path, overrides)?;
    let Some(api_key) = cfg.api_key.clone() else {
        anyhow::bail!("api key not configured; pass --api-key or set SITESYNC_API_KEY");
    };

    let mut engine = Engine::new(&cfg.sync_folder, &cfg.server_url, &api_key)?
        .with_runtime_options(cfg.runtime.0);
    engine.init(&cfg.username).await.context("init engine")?;
    let stats = engine.stats_snapshot().await;
    let recent_errors = engine.recent_errors().await;
    engine.stop().await;

    println!("{}", serde_json::to_string_pretty(&stats)?);
    if !recent_errors.is_empty() {
        eprintln!("recent errors:");
        for e in recent_errors {
            eprintln!(
                "  {} {} {:?}",
                e.file.as_deref().unwrap_or("-"),
                e.message,
                e.kind
            );
        }
    }
    Ok(())
}

fn detailed_version() -> String {
    let version = env!("CARGO_PKG_VERSION");
    let revision = option_env!("SITESYNC_REVISION").unwrap_or("HEAD");
    format!(
        "{} ({}; rust; {}/{})",
        version,
        revision,
        std::env::consts::OS,
        std::env::consts::ARCH,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_cli_allows_no_subcommand() {
        let cli = Cli::try_parse_from(["sitesync"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn start_cli_parses_overrides() {
        let cli = Cli::try_parse_from([
            "sitesync",
            "--sync-folder",
            "/tmp/sites",
            "--username",
            "alice",
            "--server",
            "https://app.example.com",
            "--api-key",
            "secret",
            "start",
        ])
        .unwrap();

        assert_eq!(cli.sync_folder, Some(PathBuf::from("/tmp/sites")));
        assert_eq!(cli.username, Some("alice".to_string()));
        assert_eq!(cli.api_key, Some("secret".to_string()));
        assert!(matches!(cli.command, Some(Commands::Start)));
    }

    #[test]
    fn config_path_and_version_parse() {
        let cli = Cli::try_parse_from(["sitesync", "config-path"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::ConfigPath)));

        let cli = Cli::try_parse_from(["sitesync", "version"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Version)));
    }
}
