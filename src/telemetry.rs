//! Tracing initialisation.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;

/// Installs the global tracing subscriber.
///
/// The filter comes from `RUST_LOG` and falls back to `default_filter`.
/// Calling this again once a subscriber is installed has no effect.
pub fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| parse_filter(default_filter));
    install(filter);
}

/// Installs the global tracing subscriber with the configured log filter.
///
/// `Config::rust_log` already reflects `RUST_LOG` or `config.toml`, so this
/// is the call to make once configuration is loaded.
pub fn init_from_config(config: &Config) {
    install(parse_filter(&config.rust_log));
}

/// Parses filter directives, falling back to `info` when they are invalid.
fn parse_filter(directives: &str) -> EnvFilter {
    EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new("info"))
}

fn install(filter: EnvFilter) {
    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true);

    if tracing_subscriber::registry().with(filter).with(fmt_layer).try_init().is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
