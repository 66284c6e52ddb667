//! Terminal logger for binaries and examples. The library itself only emits
//! through the `log` facade.

use simplelog::{ColorChoice, ConfigBuilder, LevelFilter, TermLogger, TerminalMode};

/// Installs a `simplelog` terminal logger at `level`.
///
/// A logger installed earlier stays in place; the call is then a no-op.
pub fn init_logger(level: LevelFilter) {
    let config = ConfigBuilder::new()
        .set_time_level(LevelFilter::Off)
        .set_target_level(LevelFilter::Debug)
        .build();
    let _ = TermLogger::init(level, config, TerminalMode::Mixed, ColorChoice::Auto);
}
