use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,powerscore=debug";

static INIT: OnceCell<()> = OnceCell::new();

/// Install the global tracing subscriber once per process.
///
/// `RUST_LOG` overrides the default filter; `POWERSCORE_LOG_JSON=1` switches
/// to JSON lines for log shipping.
pub fn init_logging() {
    INIT.get_or_init(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(true);
        let result = if json_enabled() {
            builder.json().try_init()
        } else {
            builder.try_init()
        };
        if let Err(err) = result {
            eprintln!("[WARN] logging already initialised: {err}");
        }
    });
}

fn json_enabled() -> bool {
    match std::env::var("POWERSCORE_LOG_JSON") {
        Ok(raw) => matches!(
            raw.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "on" | "yes"
        ),
        Err(_) => false,
    }
}
