use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use rust_pdf_merger::config::{MergeConfig, MergeOrder, ReduceStrategy, SplitMode};
use rust_pdf_merger::infrastructure::storage;
use rust_pdf_merger::models::{Delivery, MergeOptions};
use rust_pdf_merger::services::merge_service::MergeService;
use rust_pdf_merger::services::purge::purge_stale;
use rust_pdf_merger::services::session::MergeSession;
use rust_pdf_merger::{AppState, create_app};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API
    Serve {
        /// Port for the API server
        #[arg(short, long, default_value_t = 3000)]
        port: u16,
    },
    /// Merge local files into one document, or into parts plus a manifest
    Merge {
        /// Input documents, in upload order
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Directory the results are written to
        #[arg(short, long, default_value = ".")]
        out_dir: PathBuf,

        /// Output file name
        #[arg(short, long)]
        name: Option<String>,

        /// upload or name
        #[arg(long)]
        order: Option<MergeOrder>,

        /// left-fold or balanced
        #[arg(long)]
        strategy: Option<ReduceStrategy>,

        /// Part size in MiB (5..=500)
        #[arg(long)]
        part_size_mb: Option<u64>,

        /// auto, always or never
        #[arg(long)]
        split: Option<SplitMode>,

        #[arg(long)]
        skip_page_count: bool,

        /// Upload the result to the configured object store
        #[arg(long)]
        upload_remote: bool,
    },
    /// Delete session directories left behind under STAGING_DIR
    Purge {
        #[arg(long, default_value_t = 24)]
        older_than_hours: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rust_pdf_merger=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = MergeConfig::from_env();
    info!(
        "⚙️  Merge Config: Staging={}, Part Size={}MB, Split Threshold={}MB, Order={:?}, Strategy={:?}",
        config.staging_dir.display(),
        config.part_size_mb,
        config.split_threshold_mb,
        config.merge_order,
        config.reduce_strategy
    );

    match cli.command {
        Command::Serve { port } => serve(config, port).await,
        Command::Merge {
            inputs,
            out_dir,
            name,
            order,
            strategy,
            part_size_mb,
            split,
            skip_page_count,
            upload_remote,
        } => {
            let options = MergeOptions {
                order,
                strategy,
                part_size_mb,
                split,
                upload_remote: upload_remote.then_some(true),
                skip_page_count: skip_page_count.then_some(true),
                output_name: name,
            };
            merge_files(config, inputs, out_dir, options).await
        }
        Command::Purge { older_than_hours } => {
            let older_than = Duration::from_secs(older_than_hours * 3600);
            let report = purge_stale(&config.staging_dir, older_than)?;
            info!(
                "🧹 Purge finished: {} removed, {} kept",
                report.removed, report.kept
            );
            Ok(())
        }
    }
}

async fn serve(config: MergeConfig, port: u16) -> anyhow::Result<()> {
    info!("🚀 Starting Rust PDF Merger...");

    let remote = storage::setup_remote_store().await;
    let state = AppState::new(MergeService::new(config, remote));

    let app = create_app(state).layer(
        TraceLayer::new_for_http()
            .make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("unknown");
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    uri = %request.uri(),
                    request_id = %request_id,
                )
            })
            .on_request(|request: &axum::http::Request<_>, _span: &tracing::Span| {
                info!("📥 {} {}", request.method(), request.uri());
            })
            .on_response(
                |response: &axum::http::Response<_>,
                 latency: std::time::Duration,
                 _span: &tracing::Span| {
                    info!(
                        "📤 Finished in {:?} with status {}",
                        latency,
                        response.status()
                    );
                },
            ),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("✅ Server ready at http://{}", addr);
    info!("📖 Swagger UI: http://{}/swagger-ui", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("🛑 Server shut down gracefully.");
    Ok(())
}

async fn merge_files(
    config: MergeConfig,
    inputs: Vec<PathBuf>,
    out_dir: PathBuf,
    options: MergeOptions,
) -> anyhow::Result<()> {
    let remote = if options.upload_remote == Some(true) {
        storage::setup_remote_store().await
    } else {
        None
    };
    let service = MergeService::new(config, remote);
    let mut session = MergeSession::create(&service.config().staging_dir)?;

    for input in &inputs {
        let file_name = input
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let reader = tokio::fs::File::open(input).await?;
        service
            .stage(&mut session, &file_name, reader, options.skip_page_count)
            .await?;
    }

    let blocked = session.blocking_names();
    if !blocked.is_empty() {
        anyhow::bail!(
            "cannot merge, these inputs are encrypted or unreadable: {}",
            blocked.join(", ")
        );
    }

    let outcome = service.finalize(&mut session, options).await?;
    for warning in &outcome.warnings {
        warn!("⚠️  {}", warning);
    }

    match &outcome.delivery {
        Delivery::Remote { url, .. } => {
            println!("{}", url);
        }
        Delivery::Single { .. } | Delivery::Parts { .. } => {
            for path in service.export_artifacts(&mut session, &out_dir)? {
                println!("{}", path.display());
            }
        }
    }

    info!(
        "✅ {} ({} bytes, {} pages, sha256 {})",
        outcome.output_name,
        outcome.total_size,
        outcome
            .pages
            .map(|p| p.to_string())
            .unwrap_or_else(|| "?".to_string()),
        outcome.sha256
    );
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("⌨️  Ctrl+C received, starting graceful shutdown...");
        },
        _ = terminate => {
            info!("💤 SIGTERM received, starting graceful shutdown...");
        },
    }
}
