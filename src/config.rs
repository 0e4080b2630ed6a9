use std::fs::File;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use log::LevelFilter;

use serde::{Deserialize, Serialize};

use crate::validate::validate_board_slug;
use crate::{Error, Result};

/// Configuration for a sageboard instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// URL to connect to the database
    pub database_url: String,
    /// How many database connections to keep open
    pub pool_size: u32,
    /// File to log to, in addition to stderr
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
    /// One of `off`, `error`, `warn`, `info`, `debug` or `trace`
    pub log_level: String,
    /// Slug of the board to use when none is given
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_board: Option<String>,
}

impl Config {
    /// Open a config file at the given path.
    pub fn open<P>(path: P) -> Result<Config>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let msg = format!("Couldn't open config file at {}", path.display());

        let reader =
            File::open(path).map_err(|err| Error::from_io_error(err, msg))?;

        Config::load(reader, path)
    }

    fn load<R>(reader: R, path: &Path) -> Result<Config>
    where
        R: std::io::Read,
    {
        let config: Config = serde_yaml::from_reader(reader)?;
        config.check(path)?;
        Ok(config)
    }

    fn check(&self, path: &Path) -> Result<()> {
        let invalid = |key: &str, reason: String| Error::ConfigInvalid {
            path: path.display().to_string(),
            key: key.to_string(),
            reason,
        };

        if self.database_url.is_empty() {
            return Err(invalid("database_url", "it is empty".into()));
        }
        if self.pool_size == 0 {
            return Err(invalid("pool_size", "it must be at least 1".into()));
        }
        if let Err(e) = LevelFilter::from_str(&self.log_level) {
            return Err(invalid(
                "log_level",
                format!("{:?} is not a log level ({})", self.log_level, e),
            ));
        }
        if let Some(ref slug) = self.default_board {
            validate_board_slug(slug)
                .map_err(|e| invalid("default_board", e.to_string()))?;
        }

        Ok(())
    }

    /// Generate a new config file from default values.
    pub fn generate<W>(mut out: W) -> Result<()>
    where
        W: std::io::Write,
    {
        writeln!(&mut out, "# Configuration for sageboard")?;
        serde_yaml::to_writer(&mut out, &Config::default())?;
        writeln!(&mut out)?;
        Ok(())
    }

    /// Get the default location of the config file.
    pub fn default_path() -> PathBuf {
        if cfg!(debug_assertions) {
            PathBuf::from("contrib/dev-config.yaml")
        } else {
            PathBuf::from("/etc/sageboard/config.yaml")
        }
    }

    /// The configured log level. Unknown levels fall back to `info`; files
    /// loaded with [Config::open] never have one.
    pub fn level_filter(&self) -> LevelFilter {
        LevelFilter::from_str(&self.log_level).unwrap_or(LevelFilter::Info)
    }

    /// Dump configuration info to the log.
    pub fn debug_log(&self) {
        use log::debug;

        debug!("  database url {}", self.database_url);
        debug!("  pool size {}", self.pool_size);
        debug!("  log level {}", self.log_level);
        if let Some(ref log_file) = self.log_file {
            debug!("  log file {}", log_file.display());
        }
        if let Some(ref board) = self.default_board {
            debug!("  default board {}", board);
        }
    }
}

impl Default for Config {
    fn default() -> Config {
        if cfg!(debug_assertions) {
            Config {
                database_url: "postgres://sageboard:@localhost/sageboard".into(),
                pool_size: 4,
                log_file: None,
                log_level: "debug".into(),
                default_board: None,
            }
        } else {
            Config {
                database_url: "postgres://sageboard:@localhost/sageboard".into(),
                pool_size: 16,
                log_file: Some(PathBuf::from("/var/log/sageboard/sageboard.log")),
                log_level: "info".into(),
                default_board: None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(yaml: &str) -> Result<Config> {
        Config::load(yaml.as_bytes(), Path::new("test.yaml"))
    }

    #[test]
    fn load_full() -> Result<()> {
        let config = load(
            "database_url: postgres://board@db/board\n\
             pool_size: 8\n\
             log_file: /tmp/board.log\n\
             log_level: WARN\n\
             default_board: news\n",
        )?;

        assert_eq!(config.database_url, "postgres://board@db/board");
        assert_eq!(config.pool_size, 8);
        assert_eq!(config.log_file, Some(PathBuf::from("/tmp/board.log")));
        assert_eq!(config.level_filter(), LevelFilter::Warn);
        assert_eq!(config.default_board.as_deref(), Some("news"));

        Ok(())
    }

    #[test]
    fn missing_keys_use_defaults() -> Result<()> {
        let config = load("pool_size: 2\n")?;

        assert_eq!(config.pool_size, 2);
        assert_eq!(config.database_url, Config::default().database_url);

        Ok(())
    }

    #[test]
    fn bad_values_name_the_key() {
        for (yaml, key) in [
            ("log_level: loud\n", "log_level"),
            ("pool_size: 0\n", "pool_size"),
            ("database_url: ''\n", "database_url"),
            ("default_board: Not A Slug\n", "default_board"),
        ] {
            match load(yaml) {
                Err(Error::ConfigInvalid { key: got, path, .. }) => {
                    assert_eq!(got, key);
                    assert_eq!(path, "test.yaml");
                }
                other => panic!("{:?} loaded as {:?}", yaml, other),
            }
        }
    }

    #[test]
    fn generated_config_loads() -> Result<()> {
        let mut out = Vec::new();
        Config::generate(&mut out)?;

        let config = Config::load(out.as_slice(), Path::new("generated.yaml"))?;
        assert_eq!(config, Config::default());

        Ok(())
    }

    #[test]
    fn missing_file() {
        let err = Config::open("/nonexistent/sageboard.yaml").unwrap_err();
        assert!(matches!(err, Error::IoErrorMsg { .. }));
    }
}
