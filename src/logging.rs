//! Log output for hosts that do not install a `tracing` subscriber themselves.
//!
//! Plain `LEVEL message fields` lines: no timestamps, no module path, no color.

use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer, Registry};

/// Install a global subscriber at `level`.
///
/// Returns false when a global subscriber already exists (including one
/// installed by an earlier call); the existing one is kept.
pub fn init(level: Level) -> bool {
    let filter = tracing_subscriber::filter::LevelFilter::from_level(level);
    let layer = tracing_subscriber::fmt::layer()
        .without_time()
        .with_target(false)
        .with_level(true)
        .with_ansi(false)
        .compact()
        .with_filter(filter);

    Registry::default().with(layer).try_init().is_ok()
}

/// Map a C-side verbosity number to a level: 0 = warn, 1 = info, 2 = debug, 3+ = trace.
pub fn level_from_verbosity(verbosity: i32) -> Level {
    match verbosity {
        i32::MIN..=0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_maps_to_levels() {
        assert_eq!(level_from_verbosity(-3), Level::WARN);
        assert_eq!(level_from_verbosity(0), Level::WARN);
        assert_eq!(level_from_verbosity(1), Level::INFO);
        assert_eq!(level_from_verbosity(2), Level::DEBUG);
        assert_eq!(level_from_verbosity(7), Level::TRACE);
    }

    #[test]
    fn second_init_keeps_first_subscriber() {
        let _ = init(Level::INFO);
        assert!(!init(Level::DEBUG));
    }
}
