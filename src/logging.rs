use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Filter directive used when `RUST_LOG` is unset
pub fn default_directive(verbose: bool, configured: Option<&str>) -> String {
    if verbose {
        "debug".to_string()
    } else {
        configured
            .map(str::trim)
            .filter(|level| !level.is_empty())
            .unwrap_or("info")
            .to_string()
    }
}

/// Initialize logging
pub fn init_logging(verbose: bool, configured: Option<&str>) {
    let level = default_directive(verbose, configured);

    // A second initialisation (tests, embedding) is not an error
    let _ = tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbose_wins() {
        assert_eq!(default_directive(true, Some("warn")), "debug");
    }

    #[test]
    fn test_configured_level() {
        assert_eq!(default_directive(false, Some("warn")), "warn");
        assert_eq!(default_directive(false, Some("  ")), "info");
        assert_eq!(default_directive(false, None), "info");
    }
}
