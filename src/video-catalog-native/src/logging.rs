use std::env;
use std::sync::Once;
use tracing_subscriber::{fmt, EnvFilter};

static INIT: Once = Once::new();

/// Install the stderr subscriber once per process. `VIDEO_CATALOG_LOG`
/// takes an `EnvFilter` directive string; the default level is `info`.
pub fn init_logger() {
    INIT.call_once(|| {
        let filter = env::var("VIDEO_CATALOG_LOG").unwrap_or_else(|_| "info".to_string());
        let filter_layer = EnvFilter::try_new(&filter).unwrap_or_else(|_| EnvFilter::new("info"));

        let subscriber = fmt()
            .with_env_filter(filter_layer)
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_ansi(false)
            .compact()
            .finish();

        // The host process may already have installed one.
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}
