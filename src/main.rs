use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::BufReader;

use sms_forwarder::channels::modem::spawn_inbound_reader;
use sms_forwarder::channels::{HttpApiTransport, LineModemBridge, SmtpMailer};
use sms_forwarder::config::{DEFAULT_SAMPLE_FILE, config_path_from_env, load_config};
use sms_forwarder::engine::{EngineDeps, ForwardingEngine};
use sms_forwarder::logging::init_logging;
use sms_forwarder::store::{LibSqlStore, MessageStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    // Logging first so config loading and fallback are recorded
    let logging = init_logging(Path::new("."))?;

    let config_path = config_path_from_env();
    let config = load_config(&config_path, Path::new(DEFAULT_SAMPLE_FILE))
        .with_context(|| format!("loading {}", config_path.display()))?;
    logging.set_debug(config.debug)?;

    eprintln!("📟 SMS Forwarder v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Config: {}", config_path.display());
    eprintln!(
        "   Modem: {} @ {} baud",
        config.modem.port, config.modem.baudrate
    );

    // ── Database ─────────────────────────────────────────────────────────
    let db_path = Path::new(&config.database.file);
    let store: Arc<dyn MessageStore> = Arc::new(
        LibSqlStore::new_local(db_path)
            .await
            .with_context(|| format!("opening database at {}", db_path.display()))?
            .with_fragment_window(config.fragment_ttl()),
    );
    eprintln!("   Database: {}", db_path.display());

    // ── Transports ───────────────────────────────────────────────────────
    let deps = EngineDeps {
        store,
        sms: Arc::new(LineModemBridge::stdout()),
        email: Arc::new(SmtpMailer::new(&config.email, config.default_timeout())),
        api: Arc::new(HttpApiTransport::new()),
    };

    eprintln!(
        "   Destinations: {} SMS, {} email, {} API\n",
        config.sms_recipients.len(),
        config.email.recipients.len(),
        config.api_providers.len()
    );

    let engine = ForwardingEngine::start(&config, deps);
    let reader = spawn_inbound_reader(BufReader::new(tokio::io::stdin()), engine.inbound());

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, shutting down");
        }
        _ = reader => {
            tracing::info!("Modem input ended, shutting down");
        }
    }

    let dead = engine.dead_letters().len().await;
    if dead > 0 {
        tracing::warn!(dead_letters = dead, "Exiting with undelivered items");
    }
    engine.shutdown();
    Ok(())
}
