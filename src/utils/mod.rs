use tracing::Level;

/// Install the process-wide log subscriber. Call once at startup; later
/// calls are ignored.
pub fn init_logging(json: bool) {
    let builder = tracing_subscriber::fmt().with_max_level(Level::INFO);
    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if result.is_err() {
        tracing::debug!("log subscriber already installed");
    }
}
