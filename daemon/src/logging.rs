use env_logger::Env;
use std::sync::OnceLock;

static LOGGER_INIT: OnceLock<()> = OnceLock::new();

/// Installs the process-wide logger. `RUST_LOG` overrides the default `info` level.
pub fn init() {
    LOGGER_INIT.get_or_init(|| {
        if let Err(err) = env_logger::Builder::from_env(Env::default().default_filter_or("info"))
            .format_timestamp_millis()
            .try_init()
        {
            eprintln!("logger already initialized: {err}");
        }
    });
}
