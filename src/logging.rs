//! Tracing subscriber setup. Logs go to stderr so stdout stays clean for listings.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Level used when `RUST_LOG` is not set.
pub fn default_level(debug: bool, verbose: bool, quiet: bool) -> &'static str {
    if debug || verbose {
        "debug"
    } else if quiet {
        "warn"
    } else {
        "info"
    }
}

fn build_env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Install the global subscriber. A second call is a no-op.
pub fn init(debug: bool, verbose: bool, quiet: bool) {
    let level = default_level(debug, verbose, quiet);
    let installed = tracing_subscriber::registry()
        .with(build_env_filter(level))
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(debug)
                .with_thread_names(debug),
        )
        .try_init();
    if let Err(e) = installed {
        tracing::debug!(error = %e, "tracing subscriber already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_and_verbose_win_over_quiet() {
        assert_eq!(default_level(true, false, true), "debug");
        assert_eq!(default_level(false, true, true), "debug");
    }

    #[test]
    fn quiet_and_default_levels() {
        assert_eq!(default_level(false, false, true), "warn");
        assert_eq!(default_level(false, false, false), "info");
    }

    #[test]
    fn init_twice_does_not_panic() {
        init(false, false, true);
        init(true, false, false);
    }
}
