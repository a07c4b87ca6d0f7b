use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "bootstrap=info,feed_block=info,feedline_atoms=info,feedline_shared=info,warn";

/// Install the global subscriber. `RUST_LOG` overrides the default filter.
/// Lambda logs are timestamped by CloudWatch, so the formatter omits time
/// and colour.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into()))
        .with(fmt::layer().with_ansi(false).without_time())
        .init();
}
