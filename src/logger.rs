//! Methods specific to the moray logger
//!

use camino::Utf8Path;

use crate::globals::PROGRAM_NAME;

/// If debug is true set the default logger to the more verbose debug level
///
/// All messages go to stderr; `log_dir`, when given, adds a persistent log file sink.
///
pub fn setup_logger(log_dir: Option<&Utf8Path>, debug: bool) -> Result<(), fern::InitError> {
    let level = if debug {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    let logger = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}[{}][{}] {}",
                chrono::Local::now().format("[%Y-%m-%d][%H:%M:%S]"),
                PROGRAM_NAME,
                record.level(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stderr());

    let logger = if let Some(log_dir) = log_dir {
        let log_filename = log_dir.join(PROGRAM_NAME.to_string() + ".log");
        logger.chain(fern::log_file(log_filename)?)
    } else {
        logger
    };

    logger.apply()?;
    Ok(())
}
