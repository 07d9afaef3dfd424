use std::sync::Arc;

use anyhow::Context;
use cart_sdk::{CartBackend, InMemoryCartBackend, ReqwestCartBackend, SearchHit, ServerConfig};
use clap::Parser;
use smartcart_core::config::SessionSettings;
use smartcart_core::shell::{run_shell, ConsoleObserver};
use smartcart_core::spawn_session;
use smartcart_core::telemetry::init_tracing;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "smartcart", about = "SmartCart kiosk cart client")]
struct Cli {
    /// Backend base url; a bare host gets its scheme inferred.
    #[arg(long, short = 's', env = "SMARTCART_SERVER_BASE")]
    server: Option<String>,

    #[arg(long, help = "Run against an in-process backend with a demo catalog")]
    offline: bool,

    #[arg(long, help = "Poll period in milliseconds")]
    poll_interval_ms: Option<u64>,

    #[arg(long, help = "Tracing filter, e.g. info,smartcart_core=debug")]
    log_filter: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let mut settings = SessionSettings::from_env();
    if let Some(server) = cli.server {
        settings.server_base = server;
    }
    if let Some(ms) = cli.poll_interval_ms {
        settings.poll_interval = std::time::Duration::from_millis(ms.max(1));
    }
    if let Some(filter) = cli.log_filter {
        settings.log_filter = filter;
    }
    init_tracing(&settings.log_filter);

    let (backend, detector): (Arc<dyn CartBackend>, Option<Arc<InMemoryCartBackend>>) =
        if cli.offline {
            let detector = InMemoryCartBackend::with_catalog(demo_catalog());
            let backend: Arc<dyn CartBackend> = detector.clone();
            (backend, Some(detector))
        } else {
            let config = ServerConfig::new(&settings.server_base)
                .context("invalid server base url")?
                .with_timeouts(settings.timeouts);
            info!(video_feed = %config.video_feed_url()?, "camera stream");
            let backend = ReqwestCartBackend::new(config).context("building http client")?;
            let backend: Arc<dyn CartBackend> = Arc::new(backend);
            (backend, None)
        };

    info!(
        server = %settings.server_base,
        offline = cli.offline,
        poll_interval_ms = settings.poll_interval.as_millis() as u64,
        max_errors = settings.max_errors,
        cart_retries = settings.cart_retries,
        rollback = ?settings.rollback,
        "starting smartcart"
    );

    let (handle, actor) = spawn_session(backend, Arc::new(ConsoleObserver), &settings);
    if let Err(err) = handle.refresh().await {
        info!(error = %err, "initial cart load failed");
    }
    run_shell(handle, detector).await?;
    actor.await.context("session actor panicked")?;
    Ok(())
}

fn demo_catalog() -> Vec<SearchHit> {
    [
        ("Milk", 60.0, "Full cream milk - 1L"),
        ("Bread", 40.0, "Whole wheat bread - 400g"),
        ("Eggs", 75.0, "Farm eggs - dozen"),
        ("Marie Biscuits", 30.0, "Marie Biscuits - 250g pack"),
        ("Coca Cola", 45.0, "Coca Cola - 750ml bottle"),
        ("Maggi Noodles", 14.0, "Maggi 2-minute noodles - 70g"),
    ]
    .into_iter()
    .map(|(name, price, description)| SearchHit {
        name: name.into(),
        price,
        description: description.into(),
    })
    .collect()
}
