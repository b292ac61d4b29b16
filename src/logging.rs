use log::LevelFilter;

use crate::{ArborError, ArborResult};

/// Explicit logging configuration for applications built on `arbor`.
///
/// The library itself only writes to the [`log`] facade. Nothing is installed until
/// [`LoggingConfig::init`] is called, and a process can only be initialized once.
///
/// ```rust
/// use arbor::LoggingConfig;
/// use log::LevelFilter;
///
/// let config = LoggingConfig::new(LevelFilter::Warn)
///     .with_module("arbor::tree", LevelFilter::Debug)
///     .with_timestamps(false);
/// assert_eq!(config.level(), LevelFilter::Warn);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoggingConfig {
    level: LevelFilter,
    modules: Vec<(String, LevelFilter)>,
    timestamps: bool,
    is_test: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self::new(LevelFilter::Info)
    }
}

impl LoggingConfig {
    pub fn new(level: LevelFilter) -> Self {
        Self {
            level,
            modules: Vec::new(),
            timestamps: true,
            is_test: false,
        }
    }
    /// Use a different level for records from `module` and its submodules.
    pub fn with_module<T: AsRef<str>>(mut self, module: T, level: LevelFilter) -> Self {
        self.modules.push((module.as_ref().to_string(), level));
        self
    }
    pub fn with_timestamps(mut self, timestamps: bool) -> Self {
        self.timestamps = timestamps;
        self
    }
    /// Write through the test harness's captured output instead of stderr.
    pub fn for_tests(mut self) -> Self {
        self.is_test = true;
        self
    }
    pub fn level(&self) -> LevelFilter {
        self.level
    }

    fn builder(&self) -> env_logger::Builder {
        let mut builder = env_logger::Builder::new();
        builder.filter_level(self.level);
        for (module, level) in &self.modules {
            builder.filter_module(module, *level);
        }
        if self.timestamps {
            builder.format_timestamp_millis();
        } else {
            builder.format_timestamp(None);
        }
        builder.is_test(self.is_test);
        builder
    }

    /// Install the logger for the whole process.
    ///
    /// # Errors
    ///
    /// Returns [`ArborError::Custom`] if a logger has already been installed.
    pub fn init(&self) -> ArborResult<()> {
        self.builder()
            .try_init()
            .map_err(|err| ArborError::Custom(format!("failed to initialize logging: {}", err)))?;
        log::debug!("logging initialized at level {}", self.level);
        Ok(())
    }
}
