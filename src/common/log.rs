//! Logger initialisation
//!
//! Both binaries call [`init_logger`] once at startup. Library code only emits
//! records through the `log` facade.

/// Level used when `--quiet` is given
pub const QUIET_LEVEL: &str = "error";

/// Pick the effective log level from the configured level and the quiet flag
pub fn effective_level(level: &str, quiet: bool) -> &str {
    if quiet {
        QUIET_LEVEL
    } else {
        level
    }
}

/// Initialize the logging system
///
/// `RUST_LOG` takes precedence over `level` when set.
pub fn init_logger(level: &str) {
    let env = env_logger::Env::default().filter_or("RUST_LOG", level);

    // A second initialisation (e.g. from tests) is not an error worth reporting.
    let _ = env_logger::Builder::from_env(env).try_init();
}
