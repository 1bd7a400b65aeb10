use env_logger::{Builder, Env};
use log::LevelFilter;

use crate::config::LoggingConfig;

/// Installs the global logger. `verbose` lowers the default level from info to debug;
/// `RUST_LOG` still wins when set.
pub fn init(verbose: bool) {
    let level = if verbose { LevelFilter::Debug } else { LevelFilter::Info };
    install(Env::default().default_filter_or(level.to_string()));
}

/// Like [`init`], with an explicit filter from the config taking precedence.
pub fn init_from_config(config: &LoggingConfig) {
    match &config.filter {
        Some(filter) => install(Env::default().default_filter_or(filter.as_str())),
        None => init(config.verbose),
    }
}

fn install(env: Env<'_>) {
    // A logger may already be installed by an earlier call or another test.
    let _ = Builder::from_env(env).format_target(false).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init(true);
        init(false);
        init_from_config(&LoggingConfig { verbose: false, filter: Some("warn".into()) });
    }
}
