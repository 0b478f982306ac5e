//! Diagnostic logging to stderr.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Filter used when `RUST_LOG` is not set.
fn default_filter(verbose: bool) -> &'static str {
    if verbose {
        "warn,certprov=debug,certprov_client=debug,certprov_cli=debug"
    } else {
        "warn"
    }
}

/// Install the global subscriber. `RUST_LOG` takes precedence over `-v`.
///
/// Calling this twice is harmless; the second call is ignored.
pub fn init(verbose: bool, no_color: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(verbose)));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(verbose)
                .with_ansi(!no_color)
                .with_writer(std::io::stderr),
        )
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filters_parse() {
        for verbose in [false, true] {
            assert!(EnvFilter::try_new(default_filter(verbose)).is_ok());
        }
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init(false, true);
        init(true, true);
    }
}
