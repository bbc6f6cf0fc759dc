use tracing_subscriber::{fmt::SubscriberBuilder, EnvFilter};

/// Install the process-wide tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise `default_filter` applies, so every
/// binary built on this crate shares one set of filter and format rules.
pub fn init_tracing(default_filter: &str) -> Result<(), anyhow::Error> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    SubscriberBuilder::default()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("tracing subscriber init failed: {e}"))
}
