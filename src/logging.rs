//! Process-wide tracing setup.

use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Install a stderr subscriber tagging each line with the emitting thread.
///
/// Thread names are the role names given by the registry (`producer-0`,
/// `consumer-1`, ...). Returns false if a subscriber was already installed.
pub fn init(level: Level) -> bool {
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_thread_names(true)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}

/// Map a `-v` count onto a level; `base` applies with no flags.
pub fn level_for(verbosity: u8, base: Level) -> Level {
    match verbosity {
        0 => base,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_rejected() {
        init(Level::WARN);
        assert!(!init(Level::WARN));
    }

    #[test]
    fn verbosity_raises_level() {
        assert_eq!(level_for(0, Level::WARN), Level::WARN);
        assert_eq!(level_for(1, Level::WARN), Level::DEBUG);
        assert_eq!(level_for(3, Level::INFO), Level::TRACE);
    }
}
