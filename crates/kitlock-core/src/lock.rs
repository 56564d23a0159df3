use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::format::{
    format_timestamp, is_commit_hash, is_plain_version, is_schema_version, now_utc,
    parse_plain_version, parse_timestamp,
};
use crate::{ALL_COMPONENTS, BUNDLE_COMPONENT, DEPENDENCY_COMPONENT, LOCK_SCHEMA_VERSION};

/// Record of what is installed under a prefix and of every action taken against it.
///
/// The history only grows: every lifecycle operation appends exactly one entry
/// describing its own outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionLock {
    schema_version: String,
    installation_id: Uuid,
    installed_at: DateTime<Utc>,
    last_verified: Option<DateTime<Utc>>,
    components: BTreeMap<String, Component>,
    history: Vec<HistoryEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Component {
    pub version: Version,
    pub installed_from: InstallSource,
    pub commit: Option<String>,
    pub install_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub action: HistoryAction,
    pub component: String,
    pub version: Option<Version>,
    pub status: HistoryStatus,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallSource {
    Git,
    Archive,
    Manual,
    Vendored,
    PackageRegistry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryAction {
    Install,
    Upgrade,
    Verify,
    Rollback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryStatus {
    Success,
    Failure,
    Partial,
}

impl InstallSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Git => "git",
            Self::Archive => "archive",
            Self::Manual => "manual",
            Self::Vendored => "vendored",
            Self::PackageRegistry => "package-registry",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "git" => Some(Self::Git),
            "archive" => Some(Self::Archive),
            "manual" => Some(Self::Manual),
            "vendored" => Some(Self::Vendored),
            "package-registry" | "npm" => Some(Self::PackageRegistry),
            _ => None,
        }
    }
}

impl HistoryAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::Upgrade => "upgrade",
            Self::Verify => "verify",
            Self::Rollback => "rollback",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "install" => Some(Self::Install),
            "upgrade" => Some(Self::Upgrade),
            "verify" => Some(Self::Verify),
            "rollback" => Some(Self::Rollback),
            _ => None,
        }
    }
}

impl HistoryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Partial => "partial",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "success" => Some(Self::Success),
            "failure" => Some(Self::Failure),
            "partial" => Some(Self::Partial),
            _ => None,
        }
    }
}

fn is_history_component(name: &str) -> bool {
    matches!(name, BUNDLE_COMPONENT | DEPENDENCY_COMPONENT | ALL_COMPONENTS)
}

impl VersionLock {
    /// Builds the lock written by a fresh install: both components seeded and a
    /// single `install` entry for the bundle version.
    pub fn create(bundle_version: &Version, dependency_version: &Version, prefix: &Path) -> Self {
        Self::create_at(bundle_version, dependency_version, prefix, now_utc())
    }

    pub fn create_at(
        bundle_version: &Version,
        dependency_version: &Version,
        prefix: &Path,
        now: DateTime<Utc>,
    ) -> Self {
        let mut components = BTreeMap::new();
        components.insert(
            BUNDLE_COMPONENT.to_string(),
            Component {
                version: bundle_version.clone(),
                installed_from: InstallSource::Git,
                commit: None,
                install_path: prefix.display().to_string(),
            },
        );
        components.insert(
            DEPENDENCY_COMPONENT.to_string(),
            Component {
                version: dependency_version.clone(),
                installed_from: InstallSource::Vendored,
                commit: None,
                install_path: prefix.join(".specify").display().to_string(),
            },
        );

        let mut lock = Self {
            schema_version: LOCK_SCHEMA_VERSION.to_string(),
            installation_id: Uuid::new_v4(),
            installed_at: now,
            last_verified: Some(now),
            components,
            history: Vec::new(),
        };
        lock.push_history(
            now,
            HistoryAction::Install,
            ALL_COMPONENTS,
            Some(bundle_version),
            HistoryStatus::Success,
            None,
        );
        lock
    }

    pub fn from_json_str(input: &str) -> Result<Self> {
        let file: LockFile = serde_json::from_str(input)
            .map_err(|err| Error::corrupt_lock("<document>", err.to_string()))?;
        let lock = Self::from_file(file)?;
        lock.validate()?;
        Ok(lock)
    }

    pub fn to_json_string(&self) -> Result<String> {
        self.validate()?;
        let mut content = serde_json::to_string_pretty(&self.to_file())
            .map_err(|err| Error::corrupt_lock("<document>", err.to_string()))?;
        content.push('\n');
        Ok(content)
    }

    pub fn validate(&self) -> Result<()> {
        if !is_schema_version(&self.schema_version) {
            return Err(Error::corrupt_lock(
                "version",
                format!("invalid format '{}' (expected X.Y)", self.schema_version),
            ));
        }
        if self.installation_id.is_nil() {
            return Err(Error::corrupt_lock("installation_id", "must not be nil"));
        }
        if self.components.is_empty() {
            return Err(Error::corrupt_lock(
                "components",
                "version lock must have at least one component",
            ));
        }
        for (name, component) in &self.components {
            let field = |suffix: &str| format!("components.{name}.{suffix}");
            if !is_plain_version(&component.version) {
                return Err(Error::corrupt_lock(
                    field("version"),
                    format!("invalid format '{}' (expected X.Y.Z)", component.version),
                ));
            }
            if let Some(commit) = &component.commit {
                if !is_commit_hash(commit) {
                    return Err(Error::corrupt_lock(
                        field("commit"),
                        format!("invalid format '{commit}' (expected 7-40 hex chars)"),
                    ));
                }
            }
            if component.install_path.trim().is_empty() {
                return Err(Error::corrupt_lock(
                    field("install_path"),
                    "must not be empty",
                ));
            }
        }
        for (index, entry) in self.history.iter().enumerate() {
            let field = |suffix: &str| format!("history[{index}].{suffix}");
            if !is_history_component(&entry.component) {
                return Err(Error::corrupt_lock(
                    field("component"),
                    format!("invalid component '{}'", entry.component),
                ));
            }
            if let Some(version) = &entry.version {
                if !is_plain_version(version) {
                    return Err(Error::corrupt_lock(
                        field("version"),
                        format!("invalid format '{version}' (expected X.Y.Z)"),
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn schema_version(&self) -> &str {
        &self.schema_version
    }

    pub fn installation_id(&self) -> Uuid {
        self.installation_id
    }

    pub fn installed_at(&self) -> DateTime<Utc> {
        self.installed_at
    }

    pub fn last_verified(&self) -> Option<DateTime<Utc>> {
        self.last_verified
    }

    pub fn components(&self) -> &BTreeMap<String, Component> {
        &self.components
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    pub fn last_history_entry(&self) -> Option<&HistoryEntry> {
        self.history.last()
    }

    pub fn component(&self, name: &str) -> Result<&Component> {
        self.components
            .get(name)
            .ok_or_else(|| Error::ComponentNotFound {
                name: name.to_string(),
            })
    }

    pub fn set_component(&mut self, name: impl Into<String>, component: Component) {
        self.components.insert(name.into(), component);
    }

    pub fn bundle_version(&self) -> Result<&Version> {
        self.component(BUNDLE_COMPONENT)
            .map(|component| &component.version)
    }

    pub fn dependency_version(&self) -> Result<&Version> {
        self.component(DEPENDENCY_COMPONENT)
            .map(|component| &component.version)
    }

    pub fn add_history_entry(
        &mut self,
        action: HistoryAction,
        component: &str,
        version: Option<&Version>,
        status: HistoryStatus,
        error: Option<&dyn fmt::Display>,
    ) {
        self.push_history(now_utc(), action, component, version, status, error);
    }

    pub fn update_verification_time(&mut self) {
        self.last_verified = Some(now_utc());
    }

    /// Moves both components to new versions after a successful reinstall.
    pub fn record_upgrade(&mut self, bundle_version: &Version, dependency_version: &Version) {
        if let Some(component) = self.components.get_mut(BUNDLE_COMPONENT) {
            component.version = bundle_version.clone();
        }
        if let Some(component) = self.components.get_mut(DEPENDENCY_COMPONENT) {
            component.version = dependency_version.clone();
        }
        self.update_verification_time();
        self.add_history_entry(
            HistoryAction::Upgrade,
            ALL_COMPONENTS,
            Some(bundle_version),
            HistoryStatus::Success,
            None,
        );
    }

    fn push_history(
        &mut self,
        timestamp: DateTime<Utc>,
        action: HistoryAction,
        component: &str,
        version: Option<&Version>,
        status: HistoryStatus,
        error: Option<&dyn fmt::Display>,
    ) {
        self.history.push(HistoryEntry {
            timestamp,
            action,
            component: component.to_string(),
            version: version.cloned(),
            status,
            error: error.map(|err| err.to_string()),
        });
    }

    fn from_file(file: LockFile) -> Result<Self> {
        let installation_id = Uuid::parse_str(&file.installation_id).map_err(|err| {
            Error::corrupt_lock(
                "installation_id",
                format!("invalid uuid '{}': {err}", file.installation_id),
            )
        })?;
        let installed_at = parse_lock_timestamp("installed_at", &file.installed_at)?;
        let last_verified = file
            .last_verified
            .as_deref()
            .filter(|value| !value.is_empty())
            .map(|value| parse_lock_timestamp("last_verified", value))
            .transpose()?;

        let mut components = BTreeMap::new();
        for (name, component) in file.components {
            let field = |suffix: &str| format!("components.{name}.{suffix}");
            let version = parse_lock_version(&field("version"), &component.version)?;
            let installed_from =
                InstallSource::parse(&component.installed_from).ok_or_else(|| {
                    Error::corrupt_lock(
                        field("installed_from"),
                        format!(
                            "invalid value '{}' (must be git, archive, manual, vendored, or package-registry)",
                            component.installed_from
                        ),
                    )
                })?;
            let parsed = Component {
                version,
                installed_from,
                commit: component.commit.filter(|value| !value.is_empty()),
                install_path: component.install_path,
            };
            components.insert(name, parsed);
        }

        let history = file
            .history
            .into_iter()
            .enumerate()
            .map(|(index, entry)| HistoryEntry::from_file(index, entry))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            schema_version: file.version,
            installation_id,
            installed_at,
            last_verified,
            components,
            history,
        })
    }

    fn to_file(&self) -> LockFile {
        LockFile {
            version: self.schema_version.clone(),
            installation_id: self.installation_id.to_string(),
            installed_at: format_timestamp(&self.installed_at),
            last_verified: self.last_verified.as_ref().map(format_timestamp),
            components: self
                .components
                .iter()
                .map(|(name, component)| {
                    (
                        name.clone(),
                        ComponentFile {
                            version: component.version.to_string(),
                            installed_from: component.installed_from.as_str().to_string(),
                            commit: component.commit.clone(),
                            install_path: component.install_path.clone(),
                        },
                    )
                })
                .collect(),
            history: self
                .history
                .iter()
                .map(|entry| HistoryEntryFile {
                    timestamp: format_timestamp(&entry.timestamp),
                    action: entry.action.as_str().to_string(),
                    component: entry.component.clone(),
                    version: entry.version.as_ref().map(Version::to_string),
                    status: entry.status.as_str().to_string(),
                    error: entry.error.clone(),
                })
                .collect(),
        }
    }
}

impl HistoryEntry {
    fn from_file(index: usize, file: HistoryEntryFile) -> Result<Self> {
        let field = |suffix: &str| format!("history[{index}].{suffix}");
        let timestamp = parse_lock_timestamp(&field("timestamp"), &file.timestamp)?;
        let action = HistoryAction::parse(&file.action).ok_or_else(|| {
            Error::corrupt_lock(
                field("action"),
                format!(
                    "invalid value '{}' (must be install, upgrade, verify, or rollback)",
                    file.action
                ),
            )
        })?;
        let status = HistoryStatus::parse(&file.status).ok_or_else(|| {
            Error::corrupt_lock(
                field("status"),
                format!(
                    "invalid value '{}' (must be success, failure, or partial)",
                    file.status
                ),
            )
        })?;
        let version = file
            .version
            .as_deref()
            .filter(|value| !value.is_empty())
            .map(|value| parse_lock_version(&field("version"), value))
            .transpose()?;

        Ok(Self {
            timestamp,
            action,
            component: file.component,
            version,
            status,
            error: file.error.filter(|value| !value.is_empty()),
        })
    }
}

fn parse_lock_timestamp(field: &str, value: &str) -> Result<DateTime<Utc>> {
    parse_timestamp(value).ok_or_else(|| {
        Error::corrupt_lock(field, format!("invalid timestamp '{value}' (expected RFC3339)"))
    })
}

fn parse_lock_version(field: &str, value: &str) -> Result<Version> {
    parse_plain_version(value).ok_or_else(|| {
        Error::corrupt_lock(field, format!("invalid format '{value}' (expected X.Y.Z)"))
    })
}

#[derive(Debug, Serialize, Deserialize)]
struct LockFile {
    version: String,
    installation_id: String,
    installed_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_verified: Option<String>,
    components: BTreeMap<String, ComponentFile>,
    #[serde(default)]
    history: Vec<HistoryEntryFile>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ComponentFile {
    version: String,
    installed_from: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    commit: Option<String>,
    install_path: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct HistoryEntryFile {
    timestamp: String,
    action: String,
    component: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    version: Option<String>,
    status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}
