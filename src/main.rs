use anyhow::Context;
use ragdesk::{
    api,
    cli::{output::Output, Cli, Commands},
    db::{AresVectorStore, VectorStore},
    rag::{build_embedder, Ingestor, PdfPageExtractor},
    AppState, RagdeskConfig, RagdeskConfigManager,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse_args();
    let output = if cli.no_color {
        Output::no_color()
    } else {
        Output::new()
    };

    let manager = match load_config(&cli, &output) {
        Ok(manager) => manager,
        Err(e) => {
            output.error(&format!("{:#}", e));
            std::process::exit(1);
        }
    };

    init_tracing(&manager.config(), cli.verbose);

    let result = match cli.command_or_default() {
        Commands::Serve => serve(manager, &output).await,
        Commands::Ingest { paths, collection } => {
            ingest(&manager.config(), paths, collection.clone(), &output).await
        }
        Commands::Collections => collections(&manager.config(), &output).await,
        Commands::Config { validate } => {
            show_config(&manager, *validate, &output);
            Ok(())
        }
    };

    if let Err(e) = result {
        output.error(&format!("{:#}", e));
        std::process::exit(1);
    }
    Ok(())
}

/// A missing file means defaults, except when asked to validate it
fn load_config(cli: &Cli, output: &Output) -> anyhow::Result<RagdeskConfigManager> {
    let validating = matches!(cli.command_or_default(), Commands::Config { validate: true });

    if !cli.config.exists() && !validating {
        output.warning(&format!(
            "{} not found, using built-in defaults",
            cli.config.display()
        ));
        return Ok(RagdeskConfigManager::from_config(RagdeskConfig::default()));
    }

    RagdeskConfigManager::new(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))
}

fn init_tracing(config: &RagdeskConfig, verbose: bool) {
    let default_level = if verbose {
        "debug"
    } else {
        config.server.log_level.as_str()
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("ragdesk={},tower_http={}", default_level, default_level)));

    let registry = tracing_subscriber::registry().with(filter);
    if config.server.log_format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn serve(mut manager: RagdeskConfigManager, output: &Output) -> anyhow::Result<()> {
    if manager.path().exists() {
        manager
            .start_watching()
            .context("Failed to watch configuration file")?;
    }
    let manager = Arc::new(manager);
    let config = manager.config();

    let state = AppState::build(Arc::clone(&manager))
        .await
        .context("Failed to initialize services")?;
    let app = api::create_router().with_state(state);

    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    output.banner();
    output.success(&format!("Listening on http://{}", addr));
    output.kv("collection", &config.rag.collection);
    output.kv("answer model", &config.models.answer);
    output.kv("assistant model", &config.models.assistant);
    output.newline();

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    manager.stop_watching();
    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}

async fn ingest(
    config: &RagdeskConfig,
    paths: &[PathBuf],
    collection: Option<String>,
    output: &Output,
) -> anyhow::Result<()> {
    let collection = collection.unwrap_or_else(|| config.rag.collection.clone());

    output.header(&format!("Ingesting into {}", collection));
    for path in paths {
        output.list_item(&path.display().to_string());
    }

    output.step(1, 2, "Opening embedder and index");
    let embedder = build_embedder(config)?;
    let store = Arc::new(AresVectorStore::open(&config.rag.vector_path).await?);
    let ingestor = Ingestor::new(Arc::new(PdfPageExtractor), embedder, store);

    output.step(2, 2, "Extracting and embedding pages");
    let report = ingestor.ingest_paths(&collection, paths).await?;

    output.complete(&format!(
        "Indexed {} pages from {} files",
        report.chunks, report.files
    ));
    Ok(())
}

async fn collections(config: &RagdeskConfig, output: &Output) -> anyhow::Result<()> {
    let store = AresVectorStore::open(&config.rag.vector_path).await?;
    let collections = store.list_collections().await?;

    output.header("Collections");
    if collections.is_empty() {
        output.info("No collections yet");
        output.hint("Index documents with:");
        output.command("ragdesk ingest <PDF>...");
        return Ok(());
    }

    output.table_header(&["Name", "Chunks", "Dimensions"]);
    for info in collections {
        let chunks = info.document_count.to_string();
        let dims = info
            .dimensions
            .map(|d| d.to_string())
            .unwrap_or_else(|| "-".to_string());
        output.table_row(&[info.name.as_str(), chunks.as_str(), dims.as_str()]);
    }
    Ok(())
}

fn show_config(manager: &RagdeskConfigManager, validate: bool, output: &Output) {
    let config = manager.config();

    if validate {
        output.success(&format!("{} is valid", manager.path().display()));
        return;
    }

    output.header("Server");
    output.kv("address", &config.bind_address());
    output.kv("log level", &config.server.log_level);
    output.kv("log format", &config.server.log_format);

    output.header("Provider");
    output.kv("api base", &config.provider.api_base);
    output.kv("api key env", &config.provider.api_key_env);
    if config.api_key().is_err() {
        output.warning(&format!("{} is not set", config.provider.api_key_env));
    }

    output.header("Models");
    output.kv("answer", &config.models.answer);
    output.kv("assistant", &config.models.assistant);

    output.header("Retrieval");
    output.kv("vector path", &config.rag.vector_path);
    output.kv("collection", &config.rag.collection);
    output.kv("retrieve k", &config.rag.retrieve_k.to_string());
    output.kv("rerank top n", &config.rag.rerank_top_n.to_string());
    output.kv("embedder", &format!("{:?}", config.rag.embedder));
    output.kv("embedding model", &config.rag.embedding_model);
    output.kv("reranker", &format!("{:?}", config.rag.reranker));

    output.header("Assistant");
    output.kv("database", &config.assistant.database_path);
    output.kv("interpreter", &config.sandbox.interpreter);
    output.kv("timeout", &format!("{}s", config.sandbox.timeout_secs));
    output.kv(
        "network",
        if config.sandbox.isolate_network {
            "isolated"
        } else {
            "host"
        },
    );
    output.kv(
        "filesystem",
        if config.sandbox.restrict_filesystem {
            "scratch directory only"
        } else {
            "unrestricted"
        },
    );
    output.newline();
}
