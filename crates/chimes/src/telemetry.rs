//! Tracing initialization.
//!
//! Logs go to stderr so stdout stays free for control replies.

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global fmt subscriber.
///
/// `log_level` is an `EnvFilter` directive string ("info",
/// "chimes=debug,info", ...). Config loading has already folded `RUST_LOG`
/// into it.
pub fn init(log_level: &str) -> Result<()> {
    let env_filter = EnvFilter::try_new(log_level)
        .with_context(|| format!("Invalid log filter: {:?}", log_level))?;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_garbage_filters() {
        assert!(init("chimes=loudest").is_err());
    }
}
