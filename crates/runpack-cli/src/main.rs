mod commands;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::Failure;
use runpack_cache::Cancellation;
use runpack_core::{install_signal_handler, BuildEnvironment, Engine};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

const DEFAULT_CACHE_DIR: &str = "~/.cache/runpack";

#[derive(Debug, Parser)]
#[command(
    name = "runpack",
    version,
    about = "Stage runtime components into an application and assemble its start command"
)]
struct Cli {
    /// Path to the runpack configuration file.
    #[arg(long, default_value = "runpack.toml", global = true)]
    config: PathBuf,

    /// Application directory to detect against and stage into.
    #[arg(long, default_value = ".", global = true)]
    app_dir: PathBuf,

    /// Writable download cache directory (overrides the config file).
    #[arg(long, global = true)]
    cache_dir: Option<String>,

    /// Abort downloads that are still running after this many seconds.
    #[arg(long, global = true)]
    deadline_secs: Option<u64>,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Report which components apply to the application.
    Detect,
    /// Fetch and stage the dependencies of participating components.
    Compile,
    /// Print the release manifest (YAML, or JSON with --json).
    Release,
    /// Detect, compile and release in one pass.
    Build,
    /// Show the artifact each enabled component resolves to.
    Resolve,
    /// Inspect and maintain the download cache.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
    /// Generate man pages in the specified directory.
    ManPages {
        /// Output directory for man pages.
        #[arg(default_value = "man")]
        dir: PathBuf,
    },
}

#[derive(Debug, Subcommand)]
enum CacheAction {
    /// List cached artifacts.
    List,
    /// Remove the cached artifact for a URI.
    Evict {
        /// Artifact URI as published in the repository index.
        uri: String,
    },
    /// Re-hash every cached artifact and report corruption.
    Verify,
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("RUNPACK_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let json = cli.json;
    let result = match &cli.command {
        Commands::Completions { shell } => commands::completions::run::<Cli>(*shell),
        Commands::ManPages { dir } => commands::man_pages::run::<Cli>(dir),
        Commands::Detect => with_engine(&cli, |e| commands::detect::run(e, json)),
        Commands::Compile => with_engine(&cli, |e| commands::compile::run(e, json)),
        Commands::Release => with_engine(&cli, |e| commands::release::run(e, json)),
        Commands::Build => with_engine(&cli, |e| commands::build::run(e, json)),
        Commands::Resolve => with_engine(&cli, |e| commands::resolve::run(e, json)),
        Commands::Cache { action } => with_engine(&cli, |e| match action {
            CacheAction::List => commands::cache::list(e, json),
            CacheAction::Evict { uri } => commands::cache::evict(e, uri, json),
            CacheAction::Verify => commands::cache::verify(e, json),
        }),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(failure) => {
            eprintln!("error: {}", failure.message);
            ExitCode::from(failure.code)
        }
    }
}

fn with_engine(
    cli: &Cli,
    run: impl FnOnce(&Engine) -> Result<u8, Failure>,
) -> Result<u8, Failure> {
    run(&load_engine(cli)?)
}

fn load_engine(cli: &Cli) -> Result<Engine, Failure> {
    let config = runpack_schema::parse_config_file(&cli.config).map_err(|e| {
        Failure::config(format!("{}: {e}", cli.config.display()))
    })?;

    let cache_root = match (&cli.cache_dir, &config.cache.root) {
        (Some(dir), _) => expand_tilde(dir),
        (None, Some(root)) => root.clone(),
        (None, None) => expand_tilde(DEFAULT_CACHE_DIR),
    };
    tracing::debug!(
        "{} components configured, cache at {}",
        config.components.len(),
        cache_root.display()
    );

    let mut cancel = Cancellation::new();
    if let Some(secs) = cli.deadline_secs {
        cancel = cancel.with_timeout(Duration::from_secs(secs));
    }
    install_signal_handler(&cancel);

    Ok(Engine::from_config(
        config,
        &cli.app_dir,
        BuildEnvironment::capture(),
        cache_root,
        cancel,
    )?)
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(stripped);
        }
    }
    PathBuf::from(path)
}
