//! Console logging setup.
//!
//! Log lines fall into the categories Info, Progress, Important, Result, Timeout, and Error,
//! realized as tracing targets under `skein::`. The quiet flags translate into filter
//! directives, so suppressed categories never reach the formatter.

use tracing_subscriber::EnvFilter;

/// Tracing targets for the console categories.
pub mod target {
    pub const INFO: &str = "skein::info";
    pub const PROGRESS: &str = "skein::progress";
    pub const IMPORTANT: &str = "skein::important";
    pub const RESULT: &str = "skein::result";
    pub const TIMEOUT: &str = "skein::timeout";
    pub const ERROR: &str = "skein::error";
}

/// Initializes the global subscriber; colorized, category-filtered.
///
/// `RUST_LOG` still wins when set, so debugging a run stays possible without new flags.
pub fn init(no_info: bool, no_progress: bool) {
    let mut filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if no_info {
        filter = filter.add_directive(
            format!("{}=off", target::INFO).parse().expect("static directive parses"),
        );
    }
    if no_progress {
        filter = filter.add_directive(
            format!("{}=off", target::PROGRESS).parse().expect("static directive parses"),
        );
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(true)
        .init();
}
