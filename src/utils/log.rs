//! Colored stderr logging with `info!`, `warn!` and `error!` macros.
//!
//! Each line carries the level and the module that logged it:
//!
//! ```text
//! 1767225600.042 [WARN ] contract_runtime::virtual_machine::engine: engine fault at ip 3: ...
//! ```
//!
//! The macros are silent in test builds. Output is tuned with [`configure`].

use std::fmt;
use std::io::Write;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Info = 1,
    Warn = 2,
    Error = 3,
}

impl Level {
    fn from_u8(value: u8) -> Level {
        match value {
            0 | 1 => Level::Info,
            2 => Level::Warn,
            _ => Level::Error,
        }
    }

    fn color(self) -> Option<Color> {
        match self {
            Level::Info => Some(Color::Green),
            Level::Warn => Some(Color::Yellow),
            Level::Error => Some(Color::Red),
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
        };
        f.pad(name)
    }
}

/// Process-wide logging options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogConfig {
    /// Lines below this level are dropped.
    pub min_level: Level,
    /// Prefix lines with Unix time in seconds and milliseconds.
    pub timestamps: bool,
    /// Prefix lines with the logging module.
    pub targets: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            min_level: Level::Info,
            timestamps: true,
            targets: true,
        }
    }
}

const TIMESTAMPS: u8 = 1 << 2;
const TARGETS: u8 = 1 << 3;
const LEVEL_MASK: u8 = 0b11;

static CONFIG: AtomicU8 = AtomicU8::new(Level::Info as u8 | TIMESTAMPS | TARGETS);

pub fn configure(config: LogConfig) {
    let mut bits = config.min_level as u8;
    if config.timestamps {
        bits |= TIMESTAMPS;
    }
    if config.targets {
        bits |= TARGETS;
    }
    CONFIG.store(bits, Ordering::Relaxed);
}

pub fn config() -> LogConfig {
    let bits = CONFIG.load(Ordering::Relaxed);
    LogConfig {
        min_level: Level::from_u8(bits & LEVEL_MASK),
        timestamps: bits & TIMESTAMPS != 0,
        targets: bits & TARGETS != 0,
    }
}

pub fn enabled(level: Level) -> bool {
    level >= config().min_level
}

fn write_line(
    out: &mut impl WriteColor,
    config: LogConfig,
    level: Level,
    target: &str,
    message: &str,
) -> std::io::Result<()> {
    if config.timestamps {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
        write!(out, "{}.{:03} ", now.as_secs(), now.subsec_millis())?;
    }
    out.set_color(ColorSpec::new().set_fg(level.color()).set_bold(level != Level::Info))?;
    write!(out, "[{level:5}]")?;
    out.reset()?;
    if config.targets {
        write!(out, " {target}:")?;
    }
    writeln!(out, " {message}")
}

/// Backend of the logging macros.
#[doc(hidden)]
pub fn log(level: Level, target: &str, message: &str) {
    let config = config();
    if level < config.min_level {
        return;
    }
    let mut stderr = StandardStream::stderr(ColorChoice::Auto);
    let _ = write_line(&mut stderr, config, level, target, message);
}

#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {{
        if cfg!(not(test)) {
            $crate::utils::log::log($crate::utils::log::Level::Info, module_path!(), &format!($($arg)*))
        }
    }};
}

#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {{
        if cfg!(not(test)) {
            $crate::utils::log::log($crate::utils::log::Level::Warn, module_path!(), &format!($($arg)*))
        }
    }};
}

#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {{
        if cfg!(not(test)) {
            $crate::utils::log::log($crate::utils::log::Level::Error, module_path!(), &format!($($arg)*))
        }
    }};
}
