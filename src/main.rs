//! Tagwatch - Git tag watcher and release build daemon.
//!
//! Watches a repository for newly created semantic version tags and runs
//! an isolated build workflow per tag.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tagwatch::{
    classify, runner_for, AuthConfig, BuildOrchestrator, Classification, Config, RepoHandle,
    TagLedger, TagWatcher, WorkflowRunner,
};

/// Git tag watcher and release build daemon
#[derive(Parser)]
#[command(name = "tagwatch")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Subcommand to run
    #[command(subcommand)]
    command: Option<Commands>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to a config file (overrides the default lookup)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch the repository for new version tags (default)
    Watch,

    /// Initialize the local clone (idempotent; no-op if already cloned)
    Init {
        /// Remote Git URL
        #[arg(long)]
        url: String,

        /// Local path for the clone
        #[arg(long)]
        path: String,
    },

    /// Classify a tag name against the version grammar
    Classify {
        /// Tag name to classify
        tag: String,
    },

    /// Show the effective configuration
    Config {
        /// Show the config file search path instead
        #[arg(long)]
        path: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Setup logging
    let filter = if cli.verbose { EnvFilter::new("debug") } else { EnvFilter::new("info") };
    tracing_subscriber::registry().with(fmt::layer().with_target(false)).with(filter).init();

    match cli.command {
        None | Some(Commands::Watch) => cmd_watch(cli.config.as_ref()).await,
        Some(Commands::Init { url, path }) => cmd_init(&url, &path).await,
        Some(Commands::Classify { tag }) => cmd_classify(&tag),
        Some(Commands::Config { path }) => cmd_config(cli.config.as_ref(), path),
        Some(Commands::Completions { shell }) => {
            cmd_completions(shell);
            Ok(())
        }
    }
}

fn load_config(override_path: Option<&PathBuf>) -> Result<Config> {
    let config = match override_path {
        Some(path) => {
            let mut config = Config::load_from_file(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?;
            config.apply_env_overrides();
            config
        }
        None => Config::load()?,
    };
    Ok(config)
}

async fn cmd_watch(config_path: Option<&PathBuf>) -> Result<()> {
    let config = load_config(config_path)?;
    config.validate().context("invalid configuration")?;

    let auth = AuthConfig {
        token: config.repository.token.clone(),
        ssh_key_path: config.repository.ssh_key_path.clone(),
    };
    let repo = RepoHandle::new(config.repository.url.clone(), config.local_path(), auth);
    let ledger = TagLedger::shared();

    let runner: Arc<dyn WorkflowRunner> = Arc::from(runner_for(&config.build));
    let orchestrator = BuildOrchestrator::new(
        config.local_path(),
        config.workspace_root(),
        runner,
        config.build_timeout(),
        Arc::clone(&ledger),
    );

    #[cfg(feature = "notifications")]
    let orchestrator = orchestrator.with_notifier(
        config
            .notifications
            .discord_webhook_url
            .as_ref()
            .map(|url| Arc::new(tagwatch::integrations::DiscordNotifier::new(url.clone()))),
    );

    // Cooperative shutdown: Ctrl+C flips the watch channel, the loop
    // finishes in-flight builds before exiting.
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.send(true);
    })
    .context("failed to install shutdown handler")?;

    tracing::info!(
        url = %config.repository.url,
        path = %config.local_path().display(),
        interval_secs = config.watcher.poll_interval_secs,
        "Starting tag watcher"
    );

    let watcher = TagWatcher::new(
        repo,
        ledger,
        Arc::new(orchestrator),
        config.poll_interval(),
        config.retention_window(),
        config.build.concurrency,
        shutdown_rx,
    );

    watcher.run().await.context("watcher stopped")?;
    tracing::info!("Tag watcher stopped");
    Ok(())
}

async fn cmd_init(url: &str, path: &str) -> Result<()> {
    let expanded = shellexpand::tilde(path).into_owned();
    let handle = RepoHandle::new(url, expanded.clone(), AuthConfig::default());

    let cloned = tokio::task::spawn_blocking(move || handle.clone_and_initialize())
        .await
        .context("clone task failed")??;

    if cloned {
        println!("Repository cloned to {expanded}");
    } else {
        println!("Repository already initialized at {expanded}");
    }
    Ok(())
}

fn cmd_classify(tag: &str) -> Result<()> {
    match classify(tag) {
        Classification::Accepted => {
            println!("{tag}: accepted");
            Ok(())
        }
        Classification::Rejected => {
            println!("{tag}: rejected");
            std::process::exit(1);
        }
    }
}

fn cmd_config(config_path: Option<&PathBuf>, show_path: bool) -> Result<()> {
    if show_path {
        println!("./tagwatch.toml");
        if let Some(dir) = Config::config_dir() {
            println!("{}", dir.join("config.toml").display());
        }
        return Ok(());
    }

    let config = load_config(config_path)?;
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

fn cmd_completions(shell: Shell) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, &mut io::stdout());
}
