//! Logging plumbing on top of `tracing`.
//!
//! Installer code emits ordinary `tracing` events tagged with a `component`
//! field, and `success = true` marks a completed step. Nothing here installs a
//! global subscriber: callers build a [`tracing::Dispatch`] and hand it to
//! [`Lifecycle`](crate::Lifecycle) or [`BackupManager`](crate::BackupManager),
//! which run every operation under it.

use std::fmt;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use kitlock_core::{format_timestamp, now_utc};
use tracing::field::{Field, Visit};
use tracing::level_filters::LevelFilter;
use tracing::{Event, Level, Subscriber};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::{DefaultFields, Writer};
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields, MakeWriter};
use tracing_subscriber::registry::LookupSpan;

/// Component reported for events that carry no `component` field.
pub const DEFAULT_COMPONENT: &str = "installer";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
            Self::Fatal => "FATAL",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warn),
            "error" => Some(Self::Error),
            "fatal" => Some(Self::Fatal),
            _ => None,
        }
    }

    /// Fatal events are emitted at `ERROR`, so both levels keep errors visible.
    pub fn level_filter(self) -> LevelFilter {
        match self {
            Self::Debug => LevelFilter::DEBUG,
            Self::Info => LevelFilter::INFO,
            Self::Warn => LevelFilter::WARN,
            Self::Error | Self::Fatal => LevelFilter::ERROR,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The fields installer events carry, pulled out of a `tracing` event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFields {
    pub message: String,
    pub component: Option<String>,
    pub success: bool,
    pub fatal: bool,
}

impl EventFields {
    pub fn from_event(event: &Event<'_>) -> Self {
        let mut fields = Self::default();
        event.record(&mut fields);
        fields
    }

    pub fn component(&self) -> &str {
        self.component.as_deref().unwrap_or(DEFAULT_COMPONENT)
    }

    /// Status name used for badges: `ok` for success events, `fatal` for the
    /// terminating error, otherwise the event level.
    pub fn status(&self, level: &Level) -> &'static str {
        if self.fatal {
            "fatal"
        } else if self.success {
            "ok"
        } else if *level == Level::ERROR {
            "error"
        } else if *level == Level::WARN {
            "warn"
        } else if *level == Level::INFO {
            "info"
        } else {
            "debug"
        }
    }
}

impl Visit for EventFields {
    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "message" => self.message = value.to_string(),
            "component" => self.component = Some(value.to_string()),
            _ => {}
        }
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        match field.name() {
            "success" => self.success = value,
            "fatal" => self.fatal = value,
            _ => {}
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        match field.name() {
            "message" => self.message = format!("{value:?}"),
            "component" => self.component = Some(format!("{value:?}")),
            _ => {}
        }
    }
}

/// `[timestamp] [LEVEL] [component] message`, one event per line.
#[derive(Debug, Clone, Copy, Default)]
pub struct LineFormat;

impl<S, N> FormatEvent<S, N> for LineFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let fields = EventFields::from_event(event);
        let label = match fields.status(event.metadata().level()) {
            "ok" => "SUCCESS".to_string(),
            status => status.to_ascii_uppercase(),
        };
        writeln!(
            writer,
            "[{}] [{label}] [{}] {}",
            format_timestamp(&now_utc()),
            fields.component(),
            fields.message
        )
    }
}

/// fmt layer writing [`LineFormat`] records, without ANSI codes, to `writer`.
pub fn line_layer<S, W>(writer: W) -> tracing_subscriber::fmt::Layer<S, DefaultFields, LineFormat, W>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'a> MakeWriter<'a> + 'static,
{
    tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .event_format(LineFormat)
        .with_writer(writer)
}

/// Non-blocking writer appending to `path`. Queued records are written out
/// when the returned guard drops.
pub fn file_writer(path: &Path) -> Result<(NonBlocking, WorkerGuard)> {
    let file_name = path
        .file_name()
        .ok_or_else(|| anyhow!("log file path has no file name: {}", path.display()))?;
    let directory = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(directory)
        .with_context(|| format!("failed to create log directory: {}", directory.display()))?;

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(file_name.to_string_lossy().into_owned())
        .build(directory)
        .with_context(|| format!("failed to open log file: {}", path.display()))?;
    Ok(tracing_appender::non_blocking(appender))
}
