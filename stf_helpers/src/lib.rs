use simplelog::{ColorChoice, ConfigBuilder, LevelFilter, TermLogger, TerminalMode};
use stf_traits::{StfError, StfResult};

/// Parses a textual log level ("error", "warn", "info", "debug", "trace", "off").
pub fn parse_level(level: &str) -> StfResult<LevelFilter> {
    level
        .parse::<LevelFilter>()
        .map_err(|_| StfError::from(format!("Unknown log level \"{level}\"")))
}

/// This is a basic setup for a simple tf buffer application to get you started.
/// Duplicate and customize as needed when your needs grow.
///
/// It installs a terminal logger behind the `log` facade. Calling it twice is harmless: the second
/// logger is refused and the first one stays in place.
pub fn basic_stf_setup(level: LevelFilter) -> StfResult<()> {
    let config = ConfigBuilder::new()
        .set_target_level(LevelFilter::Error)
        .set_thread_level(LevelFilter::Debug)
        .build();
    match TermLogger::init(level, config, TerminalMode::Mixed, ColorChoice::Auto) {
        Ok(()) => Ok(()),
        Err(_) => {
            log::debug!("A logger was already installed, keeping it.");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("debug").unwrap(), LevelFilter::Debug);
        assert_eq!(parse_level("INFO").unwrap(), LevelFilter::Info);
        assert!(parse_level("chatty").is_err());
    }

    #[test]
    fn test_setup_twice() {
        assert!(basic_stf_setup(LevelFilter::Warn).is_ok());
        assert!(basic_stf_setup(LevelFilter::Debug).is_ok());
    }
}
