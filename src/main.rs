use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use tinyopds::config::{self, Config};
use tinyopds::library::Library;
use tinyopds::library::genres::GenreTree;
use tinyopds::scanner::{DirectoryScanner, ScanEvent};
use tinyopds::state::AppState;
use tinyopds::watcher;

#[derive(Parser)]
#[command(name = "tinyopds", version, about = "Personal OPDS e-book library server")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run a one-shot library scan and exit
    Scan,
    /// Encode credential pairs for the [auth] section and exit
    Encred {
        /// Alternating user and password arguments
        #[arg(required = true, num_args = 2..)]
        args: Vec<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // encred needs no configuration at all.
    if let Some(Command::Encred { args }) = &cli.command {
        if args.len() % 2 != 0 {
            eprintln!("encred expects user/password pairs");
            std::process::exit(1);
        }
        let pairs: Vec<(String, String)> = args
            .chunks(2)
            .map(|pair| (pair[0].clone(), pair[1].clone()))
            .collect();
        println!("{}", config::encode_credentials(&pairs));
        return;
    }

    let config = Config::load(&cli.config).unwrap_or_else(|e| {
        eprintln!("Error loading config: {e}");
        std::process::exit(1);
    });

    let filter =
        EnvFilter::try_new(&config.server.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if !config.library.path.is_dir() {
        tracing::error!("library path {:?} is not a directory", config.library.path);
        std::process::exit(1);
    }
    if let Err(e) = std::fs::create_dir_all(&config.library.data_path) {
        tracing::error!(
            "failed to create data directory {:?}: {e}",
            config.library.data_path
        );
        std::process::exit(1);
    }

    let library = Arc::new(Library::new(
        config.library.path.clone(),
        &config.library.data_path,
        GenreTree::load(),
        &config.opds.language,
    ));
    library.load();

    if matches!(cli.command, Some(Command::Scan)) {
        run_scan(library).await;
        return;
    }

    let watcher = if config.library.watch {
        match watcher::LibraryWatcher::start(library.clone()) {
            Ok(w) => Some(w),
            Err(e) => {
                tracing::error!("failed to start library watcher: {e}");
                None
            }
        }
    } else {
        None
    };

    let addr = SocketAddr::new(
        config.server.host.parse().unwrap_or_else(|_| {
            tracing::warn!(
                "Invalid host '{}', falling back to 0.0.0.0",
                config.server.host
            );
            "0.0.0.0".parse().unwrap()
        }),
        config.server.port,
    );

    tracing::info!("tinyopds v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("library root: {}", config.library.path.display());
    tracing::info!(
        "catalog: {} books ({} fb2, {} epub)",
        library.count(),
        library.fb2_count(),
        library.epub_count()
    );
    tracing::info!("listening on {addr}");

    let state = AppState::new(config, library.clone());
    let auth = state.auth.clone();
    let app = tinyopds::build_router(state);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("failed to bind to {addr}: {e}");
            std::process::exit(1);
        }
    };

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown requested");
    };

    if let Err(e) = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
    {
        tracing::error!("server error: {e}");
        std::process::exit(1);
    }

    if let Some(w) = watcher {
        w.stop();
    }
    if library.is_changed() {
        library.save();
    }
    tracing::info!(
        "served {} requests, {} books, {} images; logins ok/failed {}/{}; {} unique clients",
        auth.stats.requests.load(Ordering::Relaxed),
        auth.stats.books_sent.load(Ordering::Relaxed),
        auth.stats.images_sent.load(Ordering::Relaxed),
        auth.stats.successful_logins.load(Ordering::Relaxed),
        auth.stats.wrong_logins.load(Ordering::Relaxed),
        auth.stats.unique_clients()
    );
}

/// One-shot scan: walk the library root, admit everything valid, save.
async fn run_scan(library: Arc<Library>) {
    let scanner = DirectoryScanner::new();
    let mut rx = scanner.start(library.clone(), true);
    let mut added = 0u64;
    let mut duplicates = 0u64;

    while let Some(event) = rx.recv().await {
        match event {
            ScanEvent::BookFound(book) => {
                if library.add(book) {
                    added += 1;
                } else {
                    duplicates += 1;
                }
            }
            ScanEvent::InvalidBook(path) => tracing::debug!("invalid book: {path}"),
            ScanEvent::FileSkipped(_) => {}
            ScanEvent::Completed(stats) => {
                tracing::info!(
                    "scan finished: added={added}, duplicates={duplicates}, invalid={}, skipped={}",
                    stats.invalid,
                    stats.skipped
                );
            }
        }
    }

    library.save();
    tracing::info!(
        "catalog: {} books ({} fb2, {} epub)",
        library.count(),
        library.fb2_count(),
        library.epub_count()
    );
}
