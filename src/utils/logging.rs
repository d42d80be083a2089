//! Logger bootstrap and tagged conditional logging macros.
//!
//! Modules using the macros define two consts:
//! ```ignore
//! const ENABLE_LOGS: bool = true;
//! const LOG_TAG: &str = "fastnow_sync::outbox";
//! ```
//! Lines are emitted with `LOG_TAG` as the log target so `RUST_LOG` can filter
//! a single component.

use log::LevelFilter;

/// Install `env_logger`, honouring `RUST_LOG`. `FASTNOW_DEBUG=1` lowers the
/// default level to debug. Safe to call more than once.
pub fn init_logging() {
    let debug_mode = std::env::var("FASTNOW_DEBUG")
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    let default_level = if debug_mode {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    let _ = env_logger::Builder::new()
        .filter_level(default_level)
        .parse_default_env()
        .try_init();
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::debug!(target: LOG_TAG, $($arg)*);
        }
    };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::info!(target: LOG_TAG, $($arg)*);
        }
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::warn!(target: LOG_TAG, $($arg)*);
        }
    };
}

/// Errors are never gated.
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        log::error!(target: LOG_TAG, $($arg)*)
    };
}
