//! Tracing subscriber setup for the binary.

use taskpilot_config::LoggingConfig;
use tracing_subscriber::EnvFilter;

/// Filter directive used when `RUST_LOG` is unset.
fn default_directive(config: &LoggingConfig, verbose: bool) -> String {
    if verbose {
        "debug".into()
    } else {
        config.level.clone()
    }
}

/// Install the global subscriber. `RUST_LOG` wins over the config.
pub fn init(config: &LoggingConfig, verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(config, verbose)));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if config.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbose_forces_debug() {
        let config = LoggingConfig {
            level: "warn".into(),
            json: false,
        };
        assert_eq!(default_directive(&config, false), "warn");
        assert_eq!(default_directive(&config, true), "debug");
    }
}
