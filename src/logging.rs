//! Log setup for the binaries.

use fern::colors::{Color, ColoredLevelConfig};
use fern::Dispatch;

use crate::config::Config;
use crate::{Error, Result};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Send log records to stderr, and to the config's log file if it has one.
pub fn init(config: &Config) -> Result<()> {
    let colors = ColoredLevelConfig::new()
        .info(Color::Green)
        .debug(Color::Cyan)
        .trace(Color::BrightBlack);

    let stderr = Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "{} {} {}",
                chrono::Local::now().format(TIME_FORMAT),
                colors.color(record.level()),
                message
            ))
        })
        .chain(std::io::stderr());

    let mut root = Dispatch::new()
        .level(config.level_filter())
        .level_for("r2d2", log::LevelFilter::Warn)
        .chain(stderr);

    if let Some(ref path) = config.log_file {
        let msg = format!("Couldn't open log file at {}", path.display());
        let file =
            fern::log_file(path).map_err(|err| Error::from_io_error(err, msg))?;

        root = root.chain(
            Dispatch::new()
                .format(|out, message, record| {
                    out.finish(format_args!(
                        "{} {:>5} [{}] {}",
                        chrono::Utc::now().format(TIME_FORMAT),
                        record.level(),
                        record.target(),
                        message
                    ))
                })
                .chain(file),
        );
    }

    root.apply()?;

    Ok(())
}
