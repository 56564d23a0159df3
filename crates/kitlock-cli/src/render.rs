use std::fmt;
use std::io;
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anstyle::{AnsiColor, Effects, Style};
use indicatif::{HumanBytes, HumanCount, ProgressBar, ProgressStyle};
use kitlock_core::{format_timestamp, BUNDLE_COMPONENT, DEPENDENCY_COMPONENT};
use kitlock_compat::{CompatibilityResult, UpdateAvailability};
use kitlock_installer::{
    BackupInfo, CopyObserver, EventFields, InstallReport, InstallationStatus, RollbackReport,
    UpdateCheck, UpdateReport,
};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

use crate::config::ColorChoice;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OutputStyle {
    Plain,
    Rich,
}

pub fn resolve_output_style(color: ColorChoice, is_terminal: bool) -> OutputStyle {
    match color {
        ColorChoice::Always => OutputStyle::Rich,
        ColorChoice::Never => OutputStyle::Plain,
        ColorChoice::Auto if is_terminal => OutputStyle::Rich,
        ColorChoice::Auto => OutputStyle::Plain,
    }
}

fn status_badge(status: &str) -> Option<(&'static str, Style)> {
    let color = |color: AnsiColor| Style::new().fg_color(Some(color.into()));
    match status {
        "ok" => Some(("[OK]", color(AnsiColor::Green).effects(Effects::BOLD))),
        "info" => Some(("[INFO]", color(AnsiColor::BrightBlue))),
        "debug" => Some(("[DEBUG]", Style::new().effects(Effects::DIMMED))),
        "warn" => Some(("[WARN]", color(AnsiColor::Yellow).effects(Effects::BOLD))),
        "error" => Some(("[ERROR]", color(AnsiColor::Red).effects(Effects::BOLD))),
        "fatal" => Some(("[FATAL]", color(AnsiColor::BrightRed).effects(Effects::BOLD))),
        _ => None,
    }
}

pub fn render_status_line(style: OutputStyle, status: &str, message: &str) -> String {
    match (style, status_badge(status)) {
        (OutputStyle::Rich, Some((badge, badge_style))) => {
            format!("{} {message}", colorize(badge_style, badge))
        }
        _ => message.to_string(),
    }
}

/// Console rendering for log events: a status badge in rich mode, the bare
/// message otherwise.
#[derive(Debug, Clone, Copy)]
pub struct BadgeFormat {
    style: OutputStyle,
}

impl BadgeFormat {
    pub fn new(style: OutputStyle) -> Self {
        Self { style }
    }
}

impl<S, N> FormatEvent<S, N> for BadgeFormat
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
        let status = fields.status(event.metadata().level());
        writeln!(
            writer,
            "{}",
            render_status_line(self.style, status, &fields.message)
        )
    }
}

/// Warnings and errors go to stderr, everything else to stdout.
pub fn console_layer<S>(style: OutputStyle) -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .event_format(BadgeFormat::new(style))
        .with_writer(io::stderr.with_max_level(Level::WARN).or_else(io::stdout))
}

struct ProgressState {
    label: String,
    total: u64,
    current: u64,
    progress_bar: Option<ProgressBar>,
    started_at: Instant,
}

/// Draws a bar for backup and restore copies; silent in plain mode.
pub struct TerminalProgress {
    style: OutputStyle,
    state: Mutex<Option<ProgressState>>,
}

impl TerminalProgress {
    pub fn new(style: OutputStyle) -> Self {
        Self {
            style,
            state: Mutex::new(None),
        }
    }
}

impl CopyObserver for TerminalProgress {
    fn begin(&self, label: &str, total_files: u64) {
        if self.style == OutputStyle::Plain {
            return;
        }
        let progress_bar = ProgressBar::new(total_files.max(1));
        if let Ok(style) = ProgressStyle::with_template(
            "{spinner:.cyan.bold} {msg:<12} [{bar:20.cyan/blue}] {pos:>3}/{len:3} {elapsed_precise}",
        ) {
            progress_bar.set_style(
                style
                    .tick_chars(progress_tick_chars(label))
                    .progress_chars("=>-"),
            );
        }
        progress_bar.set_message(label.to_string());
        progress_bar.enable_steady_tick(Duration::from_millis(80));

        if let Ok(mut state) = self.state.lock() {
            *state = Some(ProgressState {
                label: label.to_string(),
                total: total_files,
                current: 0,
                progress_bar: Some(progress_bar),
                started_at: Instant::now(),
            });
        }
    }

    fn file_copied(&self, _path: &Path) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        let Some(state) = state.as_mut() else {
            return;
        };
        state.current = (state.current + 1).min(state.total.max(1));
        if let Some(progress_bar) = &state.progress_bar {
            progress_bar.set_position(state.current);
        }
    }

    fn finish(&self) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        let Some(mut state) = state.take() else {
            return;
        };
        if let Some(progress_bar) = state.progress_bar.take() {
            progress_bar.finish_and_clear();
        }
        if let Some(line) = render_progress_line(
            self.style,
            &state.label,
            state.current,
            state.total,
            Some(state.started_at.elapsed()),
        ) {
            println!("{line}");
        }
    }
}

fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    let millis = elapsed.subsec_millis();
    format!("{secs}.{millis:03}s")
}

fn progress_tick_chars(label: &str) -> &'static str {
    match label {
        "Backing up" => ".oO@* ",
        "Restoring" => "<^>v ",
        _ => "|/-\\ ",
    }
}

fn section_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::BrightBlue.into()))
        .effects(Effects::BOLD)
}

fn progress_label_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::BrightCyan.into()))
        .effects(Effects::BOLD)
}

fn progress_bar_style() -> Style {
    Style::new().fg_color(Some(AnsiColor::BrightBlue.into()))
}

fn colorize(style: Style, text: &str) -> String {
    format!("{}{}{}", style.render(), text, style.render_reset())
}

pub fn render_section_header(style: OutputStyle, title: &str) -> Option<String> {
    match style {
        OutputStyle::Plain => None,
        OutputStyle::Rich => Some(colorize(section_style(), &format!("== {title} =="))),
    }
}

fn render_progress_line(
    style: OutputStyle,
    label: &str,
    current: u64,
    total: u64,
    elapsed: Option<Duration>,
) -> Option<String> {
    if style == OutputStyle::Plain {
        return None;
    }

    let width = 18_usize;
    let safe_total = total.max(1);
    let bounded_current = current.min(safe_total);
    let filled = ((bounded_current as usize) * width) / (safe_total as usize);
    let bar = format!(
        "{}{}",
        "=".repeat(filled),
        "-".repeat(width.saturating_sub(filled))
    );
    let percent = (bounded_current * 100) / safe_total;
    let counts = format!("{}/{}", HumanCount(current), HumanCount(total));
    let suffix = elapsed
        .map(|value| format!(" complete in {}", format_elapsed(value)))
        .unwrap_or_default();

    Some(format!(
        "{} [{}] {:>3}% {}{}",
        colorize(progress_label_style(), label),
        colorize(progress_bar_style(), &bar),
        percent,
        counts,
        suffix
    ))
}

pub fn format_install_lines(report: &InstallReport) -> Vec<String> {
    let mut lines = vec![
        format!("mode: {}", report.mode.kind),
        format!("prefix: {}", report.mode.prefix.display()),
        format!("{BUNDLE_COMPONENT}: v{}", report.bundle_version),
        format!("{DEPENDENCY_COMPONENT}: v{}", report.dependency_version),
    ];
    if report.dry_run {
        lines.push("dry run: no files were modified".to_string());
        return lines;
    }
    lines.push(format!("files installed: {}", report.files_installed));
    lines.push(report.integration.summary());
    if let Some(id) = report.installation_id {
        lines.push(format!("installation id: {id}"));
    }
    lines
}

pub fn format_status_lines(status: &InstallationStatus) -> Vec<String> {
    if !status.installed {
        return vec![format!(
            "not installed at {} (run 'spec-kit-agents install')",
            status.prefix.display()
        )];
    }

    let version = |value: &Option<semver::Version>| {
        value
            .as_ref()
            .map(|version| format!("v{version}"))
            .unwrap_or_else(|| "unknown".to_string())
    };
    let mut lines = vec![
        format!("prefix: {}", status.prefix.display()),
        format!("{BUNDLE_COMPONENT}: {}", version(&status.bundle_version)),
        format!("{DEPENDENCY_COMPONENT}: {}", version(&status.dependency_version)),
    ];
    if let Some(id) = status.installation_id {
        lines.push(format!("installation id: {id}"));
    }
    if let Some(installed_at) = &status.installed_at {
        lines.push(format!("installed at: {}", format_timestamp(installed_at)));
    }
    lines.push(format!(
        "last verified: {}",
        status
            .last_verified
            .as_ref()
            .map(format_timestamp)
            .unwrap_or_else(|| "never".to_string())
    ));
    lines.push(format!("history entries: {}", status.history_count));
    if let Some(entry) = &status.last_entry {
        let version = entry
            .version
            .as_ref()
            .map(|version| format!(" v{version}"))
            .unwrap_or_default();
        lines.push(format!(
            "last action: {} {}{version} ({}) at {}",
            entry.action.as_str(),
            entry.component,
            entry.status.as_str(),
            format_timestamp(&entry.timestamp)
        ));
    }
    lines
}

pub fn format_check_lines(result: &CompatibilityResult) -> Vec<String> {
    let mut lines = vec![format!(
        "{DEPENDENCY_COMPONENT} v{} is compatible (required v{})",
        result.installed_version, result.required_version
    )];
    if result.has_issues() {
        lines.extend(result.issues.iter().map(|issue| format!("note: {issue}")));
    }
    lines
}

pub fn format_update_check_line(check: &UpdateCheck) -> String {
    match check.availability {
        UpdateAvailability::Available => format!(
            "update available: {DEPENDENCY_COMPONENT} v{} -> v{}",
            check.current, check.available
        ),
        UpdateAvailability::UpToDate => {
            format!("{DEPENDENCY_COMPONENT} v{} is up to date", check.current)
        }
        UpdateAvailability::AheadOfManifest => format!(
            "{DEPENDENCY_COMPONENT} v{} is newer than the source's v{}",
            check.current, check.available
        ),
    }
}

pub fn format_update_lines(report: &UpdateReport) -> Vec<String> {
    if !report.updated {
        return vec![format!(
            "{BUNDLE_COMPONENT} v{} with {DEPENDENCY_COMPONENT} v{} is already installed",
            report.bundle_version, report.dependency_version
        )];
    }
    let mut lines = vec![
        format!(
            "{BUNDLE_COMPONENT}: v{} -> v{}",
            report.previous_bundle_version, report.bundle_version
        ),
        format!(
            "{DEPENDENCY_COMPONENT}: v{} -> v{}",
            report.previous_dependency_version, report.dependency_version
        ),
    ];
    if let Some(backup_id) = &report.backup_id {
        lines.push(format!("backup: {backup_id}"));
    }
    if let Some(note) = &report.note {
        lines.push(format!("note: {note}"));
    }
    lines
}

pub fn format_rollback_lines(report: &RollbackReport) -> Vec<String> {
    let version = |value: &Option<semver::Version>| {
        value
            .as_ref()
            .map(|version| format!("v{version}"))
            .unwrap_or_else(|| "unknown".to_string())
    };
    let mut lines = vec![
        format!("restored backup: {}", report.backup_id),
        format!(
            "{BUNDLE_COMPONENT}: {} -> {}",
            version(&report.previous_version),
            version(&report.restored_version)
        ),
        format!("components: {}", report.component_count),
    ];
    if !report.history_recorded {
        lines.push("warning: rollback was not recorded in the version lock".to_string());
    }
    lines
}

pub fn format_backup_list_lines(backups: &[BackupInfo]) -> Vec<String> {
    if backups.is_empty() {
        return vec!["No backups available".to_string()];
    }
    backups
        .iter()
        .map(|backup| {
            let size = backup
                .size_bytes
                .map(|bytes| format!(" {}", HumanBytes(bytes)))
                .unwrap_or_default();
            format!(
                "{}  {}{size}  {}",
                backup.backup_id,
                backup.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
                backup.backup_path.display()
            )
        })
        .collect()
}

pub fn print_lines(lines: &[String]) {
    for line in lines {
        println!("{line}");
    }
}
