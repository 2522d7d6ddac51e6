//! tsdb-expire - deletes expired OpenTSDB data according to retention rules

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tsdb_expire::config::Config;
use tsdb_expire::state::RunContext;
use tsdb_expire::tasks::retention;
use tsdb_expire::tsdb::OpenTsdb;

/// Delete expired OpenTSDB data according to retention rules.
#[derive(Debug, Parser)]
#[command(name = "tsdb-expire")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Load configuration from FILE.
    #[arg(short, long, env = "TSDB_EXPIRE_CONFIG", default_value = "config.toml", value_name = "FILE")]
    config: PathBuf,

    /// OpenTSDB host; overrides `store.url` from the configuration.
    #[arg(long, env = "TSDB_EXPIRE_HOST", value_name = "HOST")]
    host: Option<String>,

    /// OpenTSDB port, used together with --host.
    #[arg(short, long, env = "TSDB_EXPIRE_PORT", default_value_t = 4242, value_name = "PORT")]
    port: u16,

    /// Don't modify data, but still run.
    #[arg(short, long)]
    noop: bool,

    /// Enable debug logging.
    #[arg(short, long)]
    debug: bool,

    /// Emit logs as JSON.
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    /// Store URL from --host/--port, if a host was given.
    fn store_url(&self) -> Option<String> {
        self.host.as_ref().map(|host| {
            if host.contains("://") {
                host.clone()
            } else {
                format!("http://{}:{}", host, self.port)
            }
        })
    }
}

fn init_tracing(debug: bool, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if debug {
            "tsdb_expire=debug".into()
        } else {
            "tsdb_expire=info".into()
        }
    });
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug, cli.json_logs);

    let mut config = Config::load(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    if let Some(url) = cli.store_url() {
        config.store.url = url;
    }

    info!("tsdb-expire v{} starting", env!("CARGO_PKG_VERSION"));
    if cli.noop {
        info!("No-op mode: nothing will be deleted");
    }

    // Every store call is awaited in turn; one thread is all the run needs
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let store = OpenTsdb::new(&config.store)?;
        let catalog = config.catalog.build()?;
        let ctx = RunContext::new(Arc::new(store), config.settings.clone(), cli.noop);

        let summary = retention::run(&ctx, catalog.as_ref(), &config.rules)
            .await
            .context("Retention run aborted")?;
        if summary.has_failures() {
            warn!(
                failed = summary.metrics_failed,
                "Some metrics could not be processed"
            );
        }
        Ok::<_, anyhow::Error>(())
    })
}
