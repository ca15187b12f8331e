//! Progress and log events streamed to the caller while a run executes

use serde::Serialize;
use tokio::sync::mpsc;

/// Phase/percent/message snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    pub phase: String,
    pub message: String,
    pub percent: f32,
    /// Position within the current phase
    pub current: u32,
    pub total: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogMessage {
    pub level: LogLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    Progress(ProgressUpdate),
    Log(LogMessage),
}

/// Percent of `processed` over `total`, clamped to `0..=100`
///
/// A zero total counts as done.
pub fn percent(processed: usize, total: usize) -> f32 {
    if total == 0 {
        return 100.0;
    }
    ((processed as f64 / total as f64) * 100.0).clamp(0.0, 100.0) as f32
}

/// Sends run events to an optional listener and mirrors log lines to `log`
#[derive(Debug, Clone, Default)]
pub struct ProgressReporter {
    tx: Option<mpsc::UnboundedSender<RunEvent>>,
}

impl ProgressReporter {
    pub fn new(tx: Option<mpsc::UnboundedSender<RunEvent>>) -> Self {
        ProgressReporter { tx }
    }

    pub fn progress(&self, phase: &str, message: impl Into<String>, percent: f32, current: usize, total: usize) {
        self.send(RunEvent::Progress(ProgressUpdate {
            phase: phase.to_string(),
            message: message.into(),
            percent,
            current: current as u32,
            total: total as u32,
        }));
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message.into());
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warn, message.into());
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message.into());
    }

    fn log(&self, level: LogLevel, message: String) {
        match level {
            LogLevel::Info => log::info!("{}", message),
            LogLevel::Warn => log::warn!("{}", message),
            LogLevel::Error => log::error!("{}", message),
        }
        self.send(RunEvent::Log(LogMessage { level, message }));
    }

    fn send(&self, event: RunEvent) {
        if let Some(tx) = &self.tx {
            // a listener that went away must not stop the run
            let _ = tx.send(event);
        }
    }
}
