use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::atomic::{AtomicU8, Ordering};

static LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);

/// Verbosity of the planner trace.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum LogLevel {
    Critical = 1,
    Error = 2,
    Warning = 3,
    #[default]
    Info = 4,
    Debug = 5,
    Trace = 6,
}

impl From<slog::Level> for LogLevel {
    fn from(level: slog::Level) -> Self {
        match level {
            slog::Level::Critical => LogLevel::Critical,
            slog::Level::Error => LogLevel::Error,
            slog::Level::Warning => LogLevel::Warning,
            slog::Level::Info => LogLevel::Info,
            slog::Level::Debug => LogLevel::Debug,
            slog::Level::Trace => LogLevel::Trace,
        }
    }
}

pub fn set_log_level(lvl: LogLevel) {
    LOG_LEVEL.store(lvl as u8, Ordering::Relaxed);
}

#[must_use]
pub fn log_level() -> LogLevel {
    match LOG_LEVEL.load(Ordering::Relaxed) {
        1 => LogLevel::Critical,
        2 => LogLevel::Error,
        3 => LogLevel::Warning,
        4 => LogLevel::Info,
        5 => LogLevel::Debug,
        _ => LogLevel::Trace,
    }
}

pub struct Drain;

pub fn root() -> slog::Logger {
    slog::Logger::root(Drain, slog::o!())
}

#[macro_export]
macro_rules! tlog {
    ($lvl:ident, $($args:tt)*) => {{
        let logger = $crate::tlog::root();
        slog::slog_log!(logger, slog::Level::$lvl, "", $($args)*);
    }}
}

impl slog::Drain for Drain {
    type Ok = ();
    type Err = slog::Never;
    fn log(
        &self,
        record: &slog::Record,
        values: &slog::OwnedKVList,
    ) -> Result<Self::Ok, Self::Err> {
        // Max level is constant = trace, it's hardcoded in Cargo.toml
        // dependency features. In runtime it's managed by `set_log_level`.
        if LogLevel::from(record.level()) > log_level() {
            return Ok(());
        }

        let mut s = StrSerializer {
            str: format!("{}", record.msg()),
        };

        use slog::KV;
        // StrSerializer never fails, so the results carry no information.
        let _ = record.kv().serialize(record, &mut s);
        let _ = values.serialize(record, &mut s);

        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(
            stderr,
            "{} {}:{} {}",
            record.level().as_short_str(),
            record.file(),
            record.line(),
            s.str
        );
        Ok(())
    }
}

struct StrSerializer {
    pub str: String,
}

impl slog::Serializer for StrSerializer {
    fn emit_arguments(&mut self, key: slog::Key, val: &std::fmt::Arguments) -> slog::Result {
        use std::fmt::Write;
        let _ = write!(&mut self.str, ", {key}: {val}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_round_trip() {
        let before = log_level();
        set_log_level(LogLevel::Debug);
        assert_eq!(log_level(), LogLevel::Debug);
        assert!(LogLevel::from(slog::Level::Trace) > log_level());
        set_log_level(before);
    }
}
