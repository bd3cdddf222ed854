// src/telemetry.rs
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const ENV_LOG_JSON: &str = "DIGEST_LOG_JSON";
const DEFAULT_FILTER: &str = "intel_digest=info,ingest=info,dedup=info,evaluate=info,pipeline=info,delivery=info,warn";

/// Install the global subscriber: `RUST_LOG` filter (default above), compact
/// lines, or JSON lines when `DIGEST_LOG_JSON=1`. Safe to call twice.
pub fn init_tracing() {
    let json = std::env::var(ENV_LOG_JSON)
        .ok()
        .is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"));

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let registry = tracing_subscriber::registry().with(filter);
    let res = if json {
        registry.with(fmt::layer().json().with_target(true)).try_init()
    } else {
        registry.with(fmt::layer().compact()).try_init()
    };
    if res.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
