use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use chrono::NaiveDate;
use semver::Version;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::format::{
    is_integrity_token, is_plain_version, is_schema_version, parse_date, parse_plain_version,
};
use crate::DEPENDENCY_COMPONENT;

/// Author-declared pin for the vendored dependency and its compatibility window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionManifest {
    pub schema_version: String,
    pub name: String,
    pub dependencies: BTreeMap<String, Dependency>,
    pub update_policy: Option<UpdatePolicy>,
    pub last_updated: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub version: Version,
    pub source: DependencySource,
    pub install_path: String,
    pub integrity: Option<String>,
    pub compatibility: Compatibility,
}

/// Inclusive `[min, max]` window plus an explicit exclusion set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Compatibility {
    pub min_version: Option<Version>,
    pub max_version: Option<Version>,
    pub breaking_versions: Vec<Version>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencySource {
    Vendored,
    Git,
    PackageRegistry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatePolicy {
    Manual,
    Patch,
    Minor,
}

impl DependencySource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Vendored => "vendored",
            Self::Git => "git",
            Self::PackageRegistry => "package-registry",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "vendored" => Some(Self::Vendored),
            "git" => Some(Self::Git),
            "package-registry" | "npm" => Some(Self::PackageRegistry),
            _ => None,
        }
    }
}

impl UpdatePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Patch => "patch",
            Self::Minor => "minor",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "manual" => Some(Self::Manual),
            "patch" => Some(Self::Patch),
            "minor" => Some(Self::Minor),
            _ => None,
        }
    }
}

impl Compatibility {
    pub fn is_unconstrained(&self) -> bool {
        self.min_version.is_none()
            && self.max_version.is_none()
            && self.breaking_versions.is_empty()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ManifestFile {
    version: String,
    name: String,
    #[serde(default)]
    dependencies: BTreeMap<String, DependencyFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    update_policy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_updated: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct DependencyFile {
    version: String,
    source: String,
    install_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    integrity: Option<String>,
    #[serde(default, skip_serializing_if = "CompatibilityFile::is_empty")]
    compatibility: CompatibilityFile,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CompatibilityFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    min_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_version: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    breaking_versions: Vec<String>,
}

impl CompatibilityFile {
    fn is_empty(&self) -> bool {
        self.min_version.is_none() && self.max_version.is_none() && self.breaking_versions.is_empty()
    }
}

impl VersionManifest {
    pub fn from_json_str(input: &str) -> Result<Self> {
        let file: ManifestFile = serde_json::from_str(input)
            .map_err(|err| Error::corrupt_manifest("<document>", err.to_string()))?;
        Self::from_file(file)
    }

    pub fn to_json_string(&self) -> Result<String> {
        self.validate()?;
        let mut content = serde_json::to_string_pretty(&self.to_file())
            .map_err(|err| Error::corrupt_manifest("<document>", err.to_string()))?;
        content.push('\n');
        Ok(content)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|err| Error::io(path, err))?;
        Self::from_json_str(&content)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = self.to_json_string()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| Error::io(parent, err))?;
        }
        fs::write(path, content).map_err(|err| Error::io(path, err))
    }

    pub fn dependency(&self, name: &str) -> Result<&Dependency> {
        self.dependencies
            .get(name)
            .ok_or_else(|| Error::DependencyNotFound {
                name: name.to_string(),
            })
    }

    /// The dependency installed in lockstep with the bundle.
    pub fn pinned_dependency(&self) -> Result<&Dependency> {
        self.dependency(DEPENDENCY_COMPONENT)
    }

    pub fn validate(&self) -> Result<()> {
        if !is_schema_version(&self.schema_version) {
            return Err(Error::corrupt_manifest(
                "version",
                format!("invalid format '{}' (expected X.Y)", self.schema_version),
            ));
        }
        if self.name.trim().is_empty() {
            return Err(Error::corrupt_manifest("name", "must not be empty"));
        }
        if self.dependencies.is_empty() {
            return Err(Error::corrupt_manifest(
                "dependencies",
                "manifest must have at least one dependency",
            ));
        }
        for (name, dependency) in &self.dependencies {
            dependency.validate(name)?;
        }
        Ok(())
    }

    fn from_file(file: ManifestFile) -> Result<Self> {
        let update_policy = file
            .update_policy
            .as_deref()
            .filter(|value| !value.is_empty())
            .map(|value| {
                UpdatePolicy::parse(value).ok_or_else(|| {
                    Error::corrupt_manifest(
                        "update_policy",
                        format!("invalid value '{value}' (must be manual, patch, or minor)"),
                    )
                })
            })
            .transpose()?;
        let last_updated = file
            .last_updated
            .as_deref()
            .filter(|value| !value.is_empty())
            .map(|value| {
                parse_date(value).ok_or_else(|| {
                    Error::corrupt_manifest(
                        "last_updated",
                        format!("invalid date '{value}' (expected YYYY-MM-DD)"),
                    )
                })
            })
            .transpose()?;

        let mut dependencies = BTreeMap::new();
        for (name, dependency) in file.dependencies {
            let parsed = Dependency::from_file(&name, dependency)?;
            dependencies.insert(name, parsed);
        }

        let manifest = Self {
            schema_version: file.version,
            name: file.name,
            dependencies,
            update_policy,
            last_updated,
        };
        manifest.validate()?;
        Ok(manifest)
    }

    fn to_file(&self) -> ManifestFile {
        ManifestFile {
            version: self.schema_version.clone(),
            name: self.name.clone(),
            dependencies: self
                .dependencies
                .iter()
                .map(|(name, dependency)| (name.clone(), dependency.to_file()))
                .collect(),
            update_policy: self.update_policy.map(|policy| policy.as_str().to_string()),
            last_updated: self
                .last_updated
                .map(|date| date.format("%Y-%m-%d").to_string()),
        }
    }
}

impl Dependency {
    fn validate(&self, name: &str) -> Result<()> {
        let field = |suffix: &str| format!("dependencies.{name}.{suffix}");

        if !is_plain_version(&self.version) {
            return Err(Error::corrupt_manifest(
                field("version"),
                format!("invalid format '{}' (expected X.Y.Z)", self.version),
            ));
        }
        if self.install_path.trim().is_empty() {
            return Err(Error::corrupt_manifest(
                field("install_path"),
                "must not be empty",
            ));
        }
        if let Some(integrity) = &self.integrity {
            if !is_integrity_token(integrity) {
                return Err(Error::corrupt_manifest(
                    field("integrity"),
                    format!("invalid format '{integrity}' (expected sha256-[64 hex chars])"),
                ));
            }
        }
        if let (Some(min), Some(max)) = (
            &self.compatibility.min_version,
            &self.compatibility.max_version,
        ) {
            if min > max {
                return Err(Error::corrupt_manifest(
                    field("compatibility"),
                    format!("min_version {min} is greater than max_version {max}"),
                ));
            }
        }
        Ok(())
    }

    fn from_file(name: &str, file: DependencyFile) -> Result<Self> {
        let field = |suffix: &str| format!("dependencies.{name}.{suffix}");
        let version_field = |suffix: &str, value: &str| {
            parse_plain_version(value).ok_or_else(|| {
                Error::corrupt_manifest(
                    field(suffix),
                    format!("invalid format '{value}' (expected X.Y.Z)"),
                )
            })
        };

        let version = version_field("version", &file.version)?;
        let source = DependencySource::parse(&file.source).ok_or_else(|| {
            Error::corrupt_manifest(
                field("source"),
                format!(
                    "invalid value '{}' (must be vendored, git, or package-registry)",
                    file.source
                ),
            )
        })?;

        let compat = file.compatibility;
        let min_version = compat
            .min_version
            .as_deref()
            .filter(|value| !value.is_empty())
            .map(|value| version_field("compatibility.min_version", value))
            .transpose()?;
        let max_version = compat
            .max_version
            .as_deref()
            .filter(|value| !value.is_empty())
            .map(|value| version_field("compatibility.max_version", value))
            .transpose()?;
        let breaking_versions = compat
            .breaking_versions
            .iter()
            .map(|value| version_field("compatibility.breaking_versions", value))
            .collect::<Result<Vec<_>>>()?;

        let dependency = Self {
            version,
            source,
            install_path: file.install_path,
            integrity: file.integrity.filter(|value| !value.is_empty()),
            compatibility: Compatibility {
                min_version,
                max_version,
                breaking_versions,
            },
        };
        dependency.validate(name)?;
        Ok(dependency)
    }

    fn to_file(&self) -> DependencyFile {
        DependencyFile {
            version: self.version.to_string(),
            source: self.source.as_str().to_string(),
            install_path: self.install_path.clone(),
            integrity: self.integrity.clone(),
            compatibility: CompatibilityFile {
                min_version: self.compatibility.min_version.as_ref().map(Version::to_string),
                max_version: self.compatibility.max_version.as_ref().map(Version::to_string),
                breaking_versions: self
                    .compatibility
                    .breaking_versions
                    .iter()
                    .map(Version::to_string)
                    .collect(),
            },
        }
    }
}
