use std::net::SocketAddr;
use std::path::PathBuf;

use axum::{routing::get, Router};
use betflow_core::config::{PipelineConfig, TimeMode};
use betflow_core::Destination;
use betflow_io::{SinkWriter, TableRef, WriterOptions};
use betflow_ops::Executor;
use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "betflow", version, about = "Windowed split-and-route pipeline for casino bet events")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the pipeline from flags and/or a pipeline.toml
    Run(RunArgs),
    /// Serve only /metrics
    Serve {
        #[arg(long, default_value_t = 9898)]
        port: u16,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// pipeline.toml; flags given on the command line take precedence
    #[arg(short, long)]
    config: Option<PathBuf>,
    #[arg(long, env = "BETFLOW_PROJECT_ID")]
    project_id: Option<String>,
    /// file://<path> or kafka://<brokers>/<topic>
    #[arg(long, env = "BETFLOW_INPUT_SUBSCRIPTION")]
    input_subscription: Option<String>,
    /// Window length in half-minutes (1 = 30 s)
    #[arg(long)]
    window_size: Option<f64>,
    /// Close windows on publish time ("event") or on the wall clock ("processing")
    #[arg(long)]
    time: Option<TimeMode>,
    #[arg(long)]
    bigquery_dataset: Option<String>,
    /// Transactions table, then users table
    #[arg(long, num_args = 2, value_names = ["TRANSACTIONS", "USERS"])]
    bigquery_tables: Option<Vec<String>>,
    /// Root directory of the local table store
    #[arg(long)]
    warehouse: Option<PathBuf>,
    #[arg(long, default_value_t = 0)]
    http_port: u16,
}

impl RunArgs {
    fn apply(&self, cfg: &mut PipelineConfig) {
        if let Some(v) = &self.project_id {
            cfg.sink.project_id = Some(v.clone());
        }
        if let Some(v) = &self.input_subscription {
            cfg.source.subscription = v.clone();
        }
        if let Some(v) = self.window_size {
            cfg.window.size = v;
        }
        if let Some(v) = self.time {
            cfg.window.time = v;
        }
        if let Some(v) = &self.bigquery_dataset {
            cfg.sink.dataset = v.clone();
        }
        if let Some(v) = &self.bigquery_tables {
            cfg.sink.tables = v.clone();
        }
        if let Some(v) = &self.warehouse {
            cfg.sink.warehouse = v.clone();
        }
    }

    async fn load(&self) -> anyhow::Result<PipelineConfig> {
        let mut cfg = match &self.config {
            Some(path) => PipelineConfig::from_toml(&tokio::fs::read_to_string(path).await?)?,
            None => PipelineConfig::default(),
        };
        self.apply(&mut cfg);
        cfg.validate()?;
        Ok(cfg)
    }
}

fn app() -> Router {
    Router::new().route("/metrics", get(metrics))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Serve { port } => {
            let addr = SocketAddr::from(([127, 0, 0, 1], port));
            tracing::info!("serving /metrics on {}", addr);
            let listener = tokio::net::TcpListener::bind(addr).await?;
            axum::serve(listener, app()).await?;
            Ok(())
        }
        Commands::Run(args) => {
            // configuration errors stop us before any message is read
            let cfg = args.load().await?;
            if args.http_port != 0 {
                let addr = SocketAddr::from(([127, 0, 0, 1], args.http_port));
                let listener = tokio::net::TcpListener::bind(addr).await?;
                tracing::info!("serving /metrics on {}", addr);
                tokio::spawn(async move {
                    let _ = axum::serve(listener, app()).await;
                });
            }
            run_pipeline(cfg).await
        }
    }
}

async fn metrics() -> String {
    betflow_core::metrics::render_prometheus()
}

/// Resolves once `signal` fires. A handler that failed to install never resolves,
/// so the pipeline keeps running instead of stopping at once.
async fn until_signal<F>(signal: F)
where
    F: std::future::Future<Output = std::io::Result<()>>,
{
    if let Err(e) = signal.await {
        tracing::error!(error = %e, "cannot listen for ctrl-c, running until the source ends");
        std::future::pending::<()>().await;
    }
}

#[cfg(feature = "parquet")]
fn table_client(cfg: &PipelineConfig) -> betflow_io::ParquetTable {
    betflow_io::ParquetTable::new(betflow_io::ParquetTableConfig {
        warehouse: cfg.sink.warehouse.clone(),
        compression: Some("snappy".into()),
    })
}

#[cfg(not(feature = "parquet"))]
fn table_client(_cfg: &PipelineConfig) -> betflow_io::MemoryTable {
    tracing::warn!("built without parquet support, rows are kept in memory only");
    betflow_io::MemoryTable::new()
}

async fn run_pipeline(cfg: PipelineConfig) -> anyhow::Result<()> {
    let source = betflow_io::subscription::open(&cfg.source.subscription, cfg.source.group_id.as_deref())?;
    let opts = WriterOptions::from_config(&cfg.sink)?;
    let transactions = TableRef::new(&cfg.sink.dataset, cfg.transactions_table());
    let users = TableRef::new(&cfg.sink.dataset, cfg.users_table());
    tracing::info!(
        project = cfg.sink.project_id.as_deref().unwrap_or("-"),
        subscription = %cfg.source.subscription,
        %users,
        %transactions,
        "starting pipeline"
    );

    let mut exec = Executor::from_config(&cfg.window)?;
    exec.source(source)
        .users_sink(SinkWriter::new(table_client(&cfg), Destination::Users, users, opts))
        .transactions_sink(SinkWriter::new(
            table_client(&cfg),
            Destination::Transactions,
            transactions,
            opts,
        ));
    let summary = exec
        .run_until(until_signal(tokio::signal::ctrl_c()))
        .await?;
    tracing::info!(?summary, "pipeline stopped");
    Ok(())
}
