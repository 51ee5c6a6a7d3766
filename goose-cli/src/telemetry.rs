use anyhow::Result;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Install the global tracing subscriber.
pub fn init_tracing(filter: &str) -> Result<()> {
    let stdout_layer = fmt::layer()
        .with_target(false)
        .with_filter(EnvFilter::new(filter));
    tracing_subscriber::registry().with(stdout_layer).try_init()?;

    Ok(())
}
