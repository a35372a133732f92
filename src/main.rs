//! Symdex CLI - index a C/C++ project and query it through the symdex service

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use symdex::client::SymdexClient;
use symdex::config::{self, SymdexConfig};
use symdex::parser::CppParser;
use symdex::project::Project;
use symdex::ui;
use symdex::{ProjectState, SymbolKind};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_LIBRARY_PATH: &str = "/usr/lib/llvm/lib";
const SPAWN_TIMEOUT: Duration = Duration::from_secs(10);
const FIRST_SWEEP_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Parser)]
#[command(name = "symdex")]
#[command(version)]
#[command(about = "Incremental C/C++ symbol index and query service")]
#[command(long_about = r#"
Symdex indexes the translation units listed in compile_commands.json and
answers symbol queries for editors over a local HTTP service.

Example usage:
  symdex init
  symdex index
  symdex search doWork
  symdex refs c:@F@doWork#
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a symdex.toml with the defaults and ignore the index directory
    Init {
        /// Project root
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Overwrite an existing symdex.toml
        #[arg(short, long)]
        force: bool,
    },

    /// Run the query service in the foreground
    Serve {
        #[arg(short, long)]
        port: Option<u16>,

        /// Seconds without a request before the service exits
        #[arg(long)]
        idle_timeout: Option<u64>,

        /// Index worker threads
        #[arg(short, long)]
        workers: Option<usize>,

        /// Reindex files as they change on disk
        #[arg(long)]
        watch: bool,

        /// Seconds between background sweeps
        #[arg(long)]
        sweep_interval: Option<u64>,

        /// Builtin header directory; skips the probe
        #[arg(long)]
        builtin_include: Option<String>,

        /// Settings file (defaults to ./symdex.toml when present)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Sweep a project into its index without the service
    Index {
        /// Any directory inside the project
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Directory of the clang library, used to find builtin headers
        #[arg(short, long, default_value = DEFAULT_LIBRARY_PATH)]
        library_path: PathBuf,

        #[arg(short, long)]
        workers: Option<usize>,

        #[arg(long)]
        builtin_include: Option<String>,
    },

    /// Search symbols and files by prefix, starting the service if needed
    Search {
        /// Name prefix; empty shows the search hint
        #[arg(default_value = "")]
        prefix: String,

        /// Any directory inside the project
        #[arg(long, default_value = ".")]
        root: PathBuf,

        #[arg(short, long, default_value = DEFAULT_LIBRARY_PATH)]
        library_path: PathBuf,

        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,

        /// Print only the location of result N
        #[arg(long)]
        pick: Option<usize>,

        #[arg(short, long)]
        port: Option<u16>,
    },

    /// List every occurrence of a symbol id
    Refs {
        symbol_id: String,

        /// Any directory inside the project
        #[arg(long, default_value = ".")]
        root: PathBuf,

        #[arg(short, long, default_value = DEFAULT_LIBRARY_PATH)]
        library_path: PathBuf,

        /// Keep only uses of this kind (function, class, variable, ...)
        #[arg(short, long)]
        kind: Option<String>,

        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Show the service state
    Status {
        #[arg(short, long)]
        port: Option<u16>,
    },
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn absolute(path: &Path) -> anyhow::Result<PathBuf> {
    Ok(std::path::absolute(path)?)
}

/// Settings from `symdex.toml` in `dir`, or the defaults
fn project_config(dir: &Path) -> anyhow::Result<SymdexConfig> {
    Ok(config::load_config(&config::config_path_in(dir))?.unwrap_or_default())
}

fn client_for(port: Option<u16>) -> SymdexClient {
    SymdexClient::new("127.0.0.1", port.unwrap_or(config::DEFAULT_PORT))
}

/// Connect to the service, starting one in the background if none answers
async fn connect(port: Option<u16>) -> anyhow::Result<SymdexClient> {
    let client = client_for(port);
    let exe = std::env::current_exe()?;
    let spinner = ui::Spinner::new(&format!("Connecting to {}", client.base_url()));
    let started = client.ensure_running(&exe, SPAWN_TIMEOUT).await;
    spinner.finish_and_clear();
    if started? {
        tracing::info!("Started symdex service at {}", client.base_url());
    }
    Ok(client)
}

/// Connect, register `root` and make sure it has been swept at least once
async fn open_project(port: Option<u16>, root: &Path, library_path: &Path) -> anyhow::Result<SymdexClient> {
    let client = connect(port).await?;
    let root = absolute(root)?;
    client
        .register(&library_path.to_string_lossy(), &root.to_string_lossy())
        .await?;

    let spinner = ui::Spinner::new("Updating the index");
    let state = client.ensure_indexed(FIRST_SWEEP_TIMEOUT).await;
    spinner.finish_and_clear();
    if state? != ProjectState::Idle {
        ui::warn("A sweep is still running; results may be incomplete");
    }
    Ok(client)
}

fn run_init(path: &Path, force: bool) -> anyhow::Result<()> {
    let root = absolute(path)?;
    let config_path = config::config_path_in(&root);
    let defaults = SymdexConfig {
        port: Some(config::DEFAULT_PORT),
        idle_timeout_secs: Some(config::DEFAULT_IDLE_TIMEOUT_SECS),
        ..Default::default()
    };
    config::write_config(&config_path, &defaults, force)?;
    config::ensure_gitignore(&root)?;
    ui::success(&format!("Wrote {}", config_path.display()));
    Ok(())
}

fn run_index(
    path: &Path,
    library_path: &Path,
    workers: Option<usize>,
    builtin_include: Option<String>,
) -> anyhow::Result<()> {
    let root = absolute(path)?;
    let overrides = SymdexConfig {
        workers,
        builtin_include,
        ..Default::default()
    };
    let config = overrides.merged_with(&project_config(&root)?);

    ui::header(&format!("Indexing {}", root.display()));
    let parser = Arc::new(CppParser::new());
    let project = Arc::new(Project::open(&root, library_path, parser, &config)?);
    if project.root().join(".git").exists() {
        config::ensure_gitignore(project.root())?;
    }
    ui::info("Compile commands", &project.compile_db().path().display().to_string());
    ui::info("Builtin headers", project.builtin_include());

    ui::phase("Sweeping translation units, then headers");
    let started = Instant::now();
    let sweeper = Arc::clone(&project);
    let handle = std::thread::spawn(move || sweeper.scan_and_index());

    let mut progress = ui::QueueProgress::new("Indexing");
    while !handle.is_finished() {
        progress.observe(project.queue_size());
        if let Some(current) = project.index_status().first() {
            progress.set_message(current);
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    let report = handle
        .join()
        .map_err(|_| anyhow::anyhow!("Sweep thread panicked"))??;
    progress.finish(started.elapsed(), report.sources + report.headers + report.cascaded);

    let stats = project.store()?.stats()?;
    ui::section("Index");
    println!(
        "{}",
        ui::stats_table(&[
            ("Translation units", report.sources.to_string()),
            ("Headers", report.headers.to_string()),
            ("Includers reindexed", report.cascaded.to_string()),
            ("Entries", stats.entries.to_string()),
            ("Puts", stats.puts.to_string()),
            ("Deletes", stats.deletes.to_string()),
        ])
    );
    project.shutdown();
    Ok(())
}

async fn run_search(
    prefix: &str,
    root: &Path,
    library_path: &Path,
    limit: usize,
    pick: Option<usize>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let client = open_project(port, root, library_path).await?;
    let results = client.match_prefix(prefix, limit).await?;
    if let Some(n) = pick {
        match results.resolve(n) {
            Some(location) => println!("{}", location),
            None => anyhow::bail!("No result numbered {}", n),
        }
        return Ok(());
    }

    if results.is_empty() {
        for label in &results.labels {
            println!("{}", ui::dim(label));
        }
        if !prefix.is_empty() {
            ui::warn(&format!("Nothing matches '{}'", prefix));
        }
        return Ok(());
    }
    println!("{}", ui::match_table(&results));
    Ok(())
}

async fn run_refs(
    symbol_id: &str,
    kind: Option<&str>,
    root: &Path,
    library_path: &Path,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let kind = kind.map(SymbolKind::from_str).transpose()?;
    let client = open_project(port, root, library_path).await?;
    let references: Vec<_> = client
        .references(symbol_id)
        .await?
        .into_iter()
        .filter(|r| kind.is_none_or(|k| r.kind == k))
        .collect();
    if references.is_empty() {
        ui::warn(&format!("No occurrences of {}", symbol_id));
        return Ok(());
    }
    if let Some(definition) = client.definition(symbol_id).await? {
        ui::info("Definition", &ui::location(&definition.location));
    }
    println!("{}", ui::reference_table(&references));
    Ok(())
}

async fn run_status(port: Option<u16>) -> anyhow::Result<()> {
    let client = client_for(port);
    if !client.ping().await? {
        ui::warn(&format!("No symdex service at {}", client.base_url()));
        return Ok(());
    }
    let status = client.status().await?;
    println!(
        "{}",
        ui::stats_table(&[
            ("Project", status.project_root.unwrap_or_else(|| "-".to_string())),
            ("State", status.state.to_string()),
            ("Queued", status.queue_size.to_string()),
            ("Live parse", status.live_status),
        ])
    );
    for line in &status.index_status {
        ui::summary_row("worker", line);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Init { path, force } => run_init(&path, force),
        Commands::Serve {
            port,
            idle_timeout,
            workers,
            watch,
            sweep_interval,
            builtin_include,
            config,
        } => {
            let file_config = match config {
                Some(path) => config::load_config(&path)?
                    .ok_or_else(|| anyhow::anyhow!("No config at {}", path.display()))?,
                None => project_config(&std::env::current_dir()?)?,
            };
            let overrides = SymdexConfig {
                port,
                idle_timeout_secs: idle_timeout,
                workers,
                builtin_include,
                sweep_interval_secs: sweep_interval,
                watch: watch.then_some(true),
                exclude: None,
            };
            let config = overrides.merged_with(&file_config);
            symdex::server::start_server(Arc::new(CppParser::new()), config).await
        }
        Commands::Index {
            path,
            library_path,
            workers,
            builtin_include,
        } => tokio::task::spawn_blocking(move || run_index(&path, &library_path, workers, builtin_include))
            .await
            .map_err(anyhow::Error::from)
            .and_then(|r| r),
        Commands::Search {
            prefix,
            root,
            library_path,
            limit,
            pick,
            port,
        } => run_search(&prefix, &root, &library_path, limit, pick, port).await,
        Commands::Refs {
            symbol_id,
            kind,
            root,
            library_path,
            port,
        } => run_refs(&symbol_id, kind.as_deref(), &root, &library_path, port).await,
        Commands::Status { port } => run_status(port).await,
    };

    if let Err(e) = result {
        ui::error(&format!("{:#}", e));
        std::process::exit(1);
    }
    Ok(())
}
