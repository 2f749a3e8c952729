// 📝 Logging - tracing subscriber setup
// Filter comes from WARNING_LOG (e.g. `WARNING_LOG=warning_consolidation=debug`), default info.
// Log lines go to stderr; command summaries stay on stdout.

use std::sync::Once;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const LOG_ENV: &str = "WARNING_LOG";

static INIT: Once = Once::new();

/// Install the global subscriber once; later calls are no-ops
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
        install(filter);
    });
}

fn install(filter: EnvFilter) {
    // Another subscriber may already be set by an embedding program
    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_line_number(true),
        )
        .with(filter)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init_tracing();
        init_tracing();
        tracing::info!("logging initialized twice without panicking");
    }
}
