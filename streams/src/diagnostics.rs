//! A `log` sink that forwards diagnostics over a channel.
//!
//! Streams report misuse (double disposal, re-binding a kind) and verbose traces through the `log`
//! facade and never install a logger themselves. Hosts that want those diagnostics as data, for
//! an in-game console or a test, can install a [`ChannelLogger`] and drain its receiver.
//!
//! ```rust,ignore
//! let diagnostics = rusty_streams::diagnostics::install(log::LevelFilter::Warn)?;
//!
//! sub.dispose()?;
//! let _ = sub.dispose();
//!
//! for message in diagnostics.try_iter() {
//!     println!("{:?}: {}", message.level, message.message);
//! }
//! ```

use crossbeam::channel::{Receiver, Sender, unbounded};
use log::{Level, LevelFilter, Metadata, Record, SetLoggerError};

/// A captured log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogMessage {
    pub level: Level,
    pub target: String,
    pub message: String,
}

/// A [`log::Log`] implementation sending every enabled record to a channel.
pub struct ChannelLogger {
    sender: Sender<LogMessage>,
    level: LevelFilter,
}

impl log::Log for ChannelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            // A dropped receiver just means nobody is listening any more.
            let _ = self.sender.try_send(LogMessage {
                level: record.metadata().level(),
                target: record.target().to_owned(),
                message: format!("{}", record.args()),
            });
        }
    }

    fn flush(&self) {}
}

impl ChannelLogger {
    pub fn new(sender: Sender<LogMessage>, level: LevelFilter) -> Self {
        Self { sender, level }
    }

    pub fn with_receiver(level: LevelFilter) -> (Self, Receiver<LogMessage>) {
        let (sender, receiver) = unbounded();
        (Self::new(sender, level), receiver)
    }
}

/// Install a [`ChannelLogger`] as the global logger and return its receiver.
///
/// Fails if a global logger is already set.
pub fn install(level: LevelFilter) -> Result<Receiver<LogMessage>, SetLoggerError> {
    let (logger, receiver) = ChannelLogger::with_receiver(level);
    log::set_boxed_logger(Box::new(logger))?;
    log::set_max_level(level);
    Ok(receiver)
}
