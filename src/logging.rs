//! Logging setup for hosts embedding the engine.

/// Configures `env_logger` with the engine's compact format.
///
/// Plain messages for `info`/`debug`, a level prefix for warnings and
/// errors. `RUST_LOG` overrides the default level. Calling this more than
/// once is harmless.
pub fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_twice() {
        init_logging(false);
        init_logging(true);
        log::info!("logging initialized");
    }
}
