//! Festival discovery service: binary entrypoint.
//! Boots the Axum HTTP server on Shuttle with config-driven pipeline state.

use shuttle_axum::ShuttleAxum;
use tracing::warn;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use festival_discovery::bootstrap::Runtime;
use festival_discovery::metrics::Metrics;

/// Compact logs by default; `LOG_FORMAT=json` switches to JSON lines.
/// `try_init` because Shuttle may already have installed a subscriber.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("festival_discovery=info,warn"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let res = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .try_init()
    };
    if res.is_err() {
        warn!("tracing subscriber already installed");
    }
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let runtime = Runtime::from_env()?;
    let mut router = festival_discovery::router(runtime.state);

    match Metrics::init(runtime.config.cache.ttl_secs) {
        Ok(metrics) => router = router.merge(metrics.router()),
        Err(error) => warn!(%error, "metrics disabled"),
    }

    Ok(router.into())
}
