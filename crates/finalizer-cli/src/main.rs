use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use finalizer_core::impls::{HttpLedgerClient, RedisSessionStore};
use finalizer_core::{FinalizerBuilder, FinalizerConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Reports idle players' session balances back to the ledger.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML config file; flags and environment variables override it.
    #[arg(short, long, env = "FINALIZER_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, env = "REDIS_HOST")]
    redis_host: Option<String>,

    #[arg(long, env = "REDIS_PORT")]
    redis_port: Option<u16>,

    #[arg(long, env = "REDIS_USERNAME")]
    redis_username: Option<String>,

    #[arg(long, env = "REDIS_PASSWORD", hide_env_values = true)]
    redis_password: Option<String>,

    #[arg(long, env = "BACKEND_API_BASE_URL")]
    ledger_url: Option<String>,

    #[arg(long, env = "INACTIVITY_THRESHOLD_MS")]
    inactivity_threshold_ms: Option<u64>,

    #[arg(long, env = "POLLING_INTERVAL_MS")]
    poll_interval_ms: Option<u64>,

    #[arg(long, env = "REDIS_CONNECT_TIMEOUT_MS")]
    connect_timeout_ms: Option<u64>,

    /// Run a single scan cycle and exit.
    #[arg(long)]
    once: bool,

    /// Emit logs as JSON lines.
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn load_config(&self) -> anyhow::Result<FinalizerConfig> {
        let mut config = match &self.config {
            Some(path) => FinalizerConfig::load(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => FinalizerConfig::default(),
        };

        if let Some(host) = &self.redis_host {
            config.store.host = host.clone();
        }
        if let Some(port) = self.redis_port {
            config.store.port = port;
        }
        if let Some(username) = &self.redis_username {
            config.store.username = Some(username.clone());
        }
        if let Some(password) = &self.redis_password {
            config.store.password = Some(password.clone());
        }
        if let Some(ms) = self.connect_timeout_ms {
            config.store.connect_timeout_ms = ms;
        }
        if let Some(url) = &self.ledger_url {
            config.ledger.base_url = url.clone();
        }
        if let Some(ms) = self.inactivity_threshold_ms {
            config.inactivity_threshold_ms = ms;
        }
        if let Some(ms) = self.poll_interval_ms {
            config.poll_interval_ms = ms;
        }

        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.log_json);

    let config = args.load_config()?;

    // the worker cannot do anything without the store; fail fast
    let store = RedisSessionStore::connect(&config.store)
        .await
        .context("session store unavailable")?;
    let ledger = HttpLedgerClient::new(&config.ledger).context("failed to build ledger client")?;

    let builder = FinalizerBuilder::new(config.clone())
        .store_with_leases(Arc::new(store))
        .reconciler(Arc::new(ledger));

    if args.once {
        let outcome = builder
            .build()
            .context("failed to build finalizer")?
            .run_cycle()
            .await
            .context("scan cycle failed")?;
        if outcome.is_contended() {
            info!("another worker is mid-cycle, nothing to do");
        }
        return Ok(());
    }

    info!(
        inactivity_threshold_ms = config.inactivity_threshold_ms,
        poll_interval_ms = config.poll_interval_ms,
        session_key_prefix = %config.session_key_prefix,
        "session finalizer starting"
    );
    let handle = builder
        .build_scheduler()
        .context("failed to build scheduler")?
        .spawn();

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown requested");
    handle.shutdown_and_join().await;

    Ok(())
}
