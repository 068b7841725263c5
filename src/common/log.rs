//! Logging helpers
//!
//! Thin wrapper around `env_logger` so the binary and the tests share one setup.

/// Initialize the logging system
///
/// `RUST_LOG` takes precedence over `level`. Calling this more than once is harmless:
/// later calls are ignored.
///
/// # Parameters
///
/// * `level` - Default log level (error, warn, info, debug, trace)
pub fn init_logger(level: &str) {
    let env = env_logger::Env::default()
        .filter_or("RUST_LOG", level);

    // try_init: tests and embedders may already have installed a logger
    let _ = env_logger::Builder::from_env(env).try_init();
}
