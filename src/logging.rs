//! Tracing setup.
//!
//! Logs go to stderr so stdout stays parseable. `RUST_LOG` wins when set;
//! otherwise the level is `info`, or `debug` with `--verbose`.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Human,
    Json,
}

fn filter(verbose: bool) -> EnvFilter {
    let fallback = if verbose {
        "pkgindex=debug,pkgindex_core=debug,info"
    } else {
        "info"
    };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback))
}

/// Install the global subscriber. A second call is a no-op.
pub fn init_logging(verbose: bool, format: LogFormat) {
    let registry = tracing_subscriber::registry().with(filter(verbose));
    let result = match format {
        LogFormat::Human => registry
            .with(fmt::layer().compact().with_target(false).with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
    };
    if result.is_err() {
        tracing::debug!("subscriber already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_twice_is_harmless() {
        init_logging(false, LogFormat::Human);
        init_logging(true, LogFormat::Json);
    }
}
