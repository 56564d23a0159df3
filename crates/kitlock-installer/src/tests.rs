use super::*;

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{Duration, TimeZone, Utc};
use kitlock_core::{
    Component, Error, HistoryAction, HistoryStatus, InstallSource, VersionLock, BUNDLE_COMPONENT,
    DEPENDENCY_COMPONENT,
};
use kitlock_security::{integrity_token, tree_digest_hex, tree_integrity_token};
use semver::Version;
use tempfile::TempDir;
use tracing::level_filters::LevelFilter;
use tracing::{debug, info, Dispatch};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;

fn v(value: &str) -> Version {
    Version::parse(value).expect("test version must parse")
}

fn write_file(path: &Path, contents: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("must create parent dir");
    }
    fs::write(path, contents).expect("must write file");
}

fn manifest_json(version: &str, breaking: &[&str], integrity: Option<&str>) -> String {
    let breaking = breaking
        .iter()
        .map(|value| format!("\"{value}\""))
        .collect::<Vec<_>>()
        .join(", ");
    let integrity = integrity
        .map(|token| format!("\n      \"integrity\": \"{token}\","))
        .unwrap_or_default();
    format!(
        r#"{{
  "version": "1.0",
  "name": "spec-kit-agents",
  "dependencies": {{
    "spec-kit": {{
      "version": "{version}",
      "source": "vendored",
      "install_path": ".specify",{integrity}
      "compatibility": {{
        "min_version": "0.0.70",
        "max_version": "0.1.0",
        "breaking_versions": [{breaking}]
      }}
    }}
  }},
  "update_policy": "manual"
}}"#
    )
}

/// Every file under `root`, keyed by its path relative to `root`.
fn snapshot_tree(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    fn walk(root: &Path, dir: &Path, files: &mut BTreeMap<PathBuf, Vec<u8>>) {
        for entry in fs::read_dir(dir).expect("must read dir") {
            let path = entry.expect("must read entry").path();
            if path.is_dir() {
                walk(root, &path, files);
            } else {
                let relative = path.strip_prefix(root).expect("under root").to_path_buf();
                files.insert(relative, fs::read(&path).expect("must read file"));
            }
        }
    }
    let mut files = BTreeMap::new();
    walk(root, root, &mut files);
    files
}

/// In-memory target for `line_layer`.
#[derive(Clone, Default)]
struct CaptureWriter(Arc<Mutex<Vec<u8>>>);

impl CaptureWriter {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().expect("capture lock")).into_owned()
    }
}

impl io::Write for CaptureWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().expect("capture lock").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CaptureWriter {
    type Writer = CaptureWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn capture_dispatch() -> (Dispatch, CaptureWriter) {
    let writer = CaptureWriter::default();
    let subscriber = tracing_subscriber::registry()
        .with(LevelFilter::DEBUG)
        .with(line_layer(writer.clone()));
    (Dispatch::new(subscriber), writer)
}

fn root_kind(err: &anyhow::Error) -> &Error {
    root_error(err).unwrap_or_else(|| panic!("expected typed error, got {err:#}"))
}

struct Fixture {
    _temp: TempDir,
    repo: PathBuf,
    project: PathBuf,
    home: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let temp = tempfile::tempdir().expect("must create temp dir");
        let repo = temp.path().join("repo");
        let project = temp.path().join("project");
        let home = temp.path().join("home");
        fs::create_dir_all(&project).expect("must create project dir");
        fs::create_dir_all(&home).expect("must create home dir");

        write_file(&repo.join("agents/analyst.md"), "# analyst\n");
        write_file(&repo.join("agents/review/reviewer.md"), "# reviewer\n");
        write_file(&repo.join("agents/README.txt"), "not an agent\n");
        write_file(
            &repo.join(".specify/memory/constitution.md"),
            "# constitution\n",
        );
        write_file(&repo.join(".specify/templates/commands/plan.md"), "plan\n");
        write_file(&repo.join(".specify/templates/commands/tasks.md"), "tasks\n");
        write_file(
            &repo.join(".specify/version-manifest.json"),
            &manifest_json("0.0.72", &[], None),
        );

        Self {
            _temp: temp,
            repo,
            project,
            home,
        }
    }

    fn env(&self) -> InstallEnv {
        InstallEnv::new(&self.project, &self.home)
    }

    fn source(&self) -> RepositorySource {
        RepositorySource::new(&self.repo)
    }

    fn set_manifest(&self, contents: &str) {
        write_file(&self.repo.join(".specify/version-manifest.json"), contents);
    }

    fn lock(&self) -> VersionLock {
        load_version_lock(&self.project.join(VERSION_LOCK_FILE)).expect("lock must load")
    }

    fn install(&self, bundle: &str) -> InstallReport {
        let source = self.source();
        Lifecycle::new(self.env(), &source, v(bundle), &Dispatch::none())
            .install(&InstallOptions::default())
            .expect("install must succeed")
    }
}

#[test]
fn detect_fresh_coexist_and_upgrade_modes() {
    let fixture = Fixture::new();
    let env = fixture.env();

    let fresh = detect_mode(&env, None);
    assert_eq!(fresh.kind, ModeKind::Fresh);
    assert_eq!(fresh.prefix, fixture.project);
    assert!(!fresh.has_marker);

    fs::create_dir_all(fixture.project.join(SPECIFY_DIR)).expect("must create marker");
    let coexist = detect_mode(&env, None);
    assert_eq!(coexist.kind, ModeKind::Coexist);
    assert_eq!(coexist.prefix, fixture.project.join(COEXIST_PREFIX));

    write_file(&fixture.project.join(VERSION_LOCK_FILE), "{}");
    let upgrade = detect_mode(&env, None);
    assert_eq!(upgrade.kind, ModeKind::Upgrade);
    assert!(upgrade.has_marker);
    assert_eq!(upgrade.prefix, fixture.project);
}

#[test]
fn detect_honors_prefix_override() {
    let fixture = Fixture::new();
    let mode = detect_mode(&fixture.env(), Some(Path::new("tools/kit")));
    assert_eq!(mode.kind, ModeKind::Fresh);
    assert_eq!(mode.prefix, fixture.project.join("tools/kit"));

    let home_relative = fixture.env().resolve_prefix(Some(Path::new("~/kits/../kit")));
    assert_eq!(home_relative, fixture.home.join("kit"));
}

#[test]
fn validate_directory_creates_missing_and_rejects_files() {
    let fixture = Fixture::new();
    let missing = fixture.project.join("nested/prefix");
    validate_installation_directory(&missing).expect("missing dir must be created");
    assert!(missing.is_dir());

    validate_installation_directory(&missing).expect("existing dir must be writable");
    assert!(!missing.join(".write-test").exists());

    let file = fixture.project.join("plain-file");
    write_file(&file, "x");
    let err = validate_installation_directory(&file).expect_err("file must be rejected");
    assert!(matches!(root_kind(&err), Error::DirectoryNotWritable { .. }));
}

#[test]
fn backup_restores_tree_byte_identical() {
    let fixture = Fixture::new();
    write_file(&fixture.project.join("a.txt"), "alpha");
    write_file(&fixture.project.join("nested/b.txt"), "beta");

    let manager = BackupManager::new(&Dispatch::none());
    let backup = manager
        .create_backup(&fixture.project)
        .expect("backup must succeed");
    assert!(backup.backup_id.starts_with("backup-"));
    assert_eq!(
        backup.backup_path,
        backup_path_for(&fixture.project, &backup.backup_id)
    );
    assert_eq!(backup.size_bytes, Some(9));

    write_file(&fixture.project.join("a.txt"), "changed");
    write_file(&fixture.project.join("extra.txt"), "new");
    fs::remove_file(fixture.project.join("nested/b.txt")).expect("must remove");

    manager.restore_backup(&backup).expect("restore must succeed");
    assert_eq!(
        fs::read_to_string(fixture.project.join("a.txt")).expect("must read"),
        "alpha"
    );
    assert_eq!(
        fs::read_to_string(fixture.project.join("nested/b.txt")).expect("must read"),
        "beta"
    );
    assert!(!fixture.project.join("extra.txt").exists());

    manager.cleanup_backup(&backup).expect("cleanup must succeed");
    manager
        .cleanup_backup(&backup)
        .expect("second cleanup must be a no-op");
    assert!(!backup.backup_path.exists());
}

#[test]
fn backup_rejects_same_second_collision() {
    let fixture = Fixture::new();
    let manager = BackupManager::new(&Dispatch::none());
    let now = Utc
        .with_ymd_and_hms(2026, 10, 1, 12, 0, 0)
        .single()
        .expect("valid instant");

    manager
        .create_backup_at(&fixture.project, now)
        .expect("first backup must succeed");
    let err = manager
        .create_backup_at(&fixture.project, now)
        .expect_err("second backup in the same second must fail");
    assert!(matches!(root_kind(&err), Error::BackupCollision { .. }));
}

#[test]
fn backup_of_missing_path_fails() {
    let fixture = Fixture::new();
    let err = BackupManager::new(&Dispatch::none())
        .create_backup(&fixture.project.join("absent"))
        .expect_err("missing path must fail");
    assert!(matches!(root_kind(&err), Error::SourceMissing { .. }));
}

#[test]
fn list_backups_only_matches_own_directories() {
    let fixture = Fixture::new();
    let parent = fixture.project.parent().expect("project has parent");
    fs::create_dir_all(parent.join("project.backup-20260101-000000")).expect("mkdir");
    fs::create_dir_all(parent.join("project.backup-20260301-101500")).expect("mkdir");
    fs::create_dir_all(parent.join("other.backup-20260101-000000")).expect("mkdir");
    fs::create_dir_all(parent.join("project-extra.backup-20260101-000000")).expect("mkdir");
    write_file(&parent.join("project.backup-20260201-000000"), "not a dir");

    let manager = BackupManager::new(&Dispatch::none());
    let mut ids = manager
        .list_backups(&fixture.project)
        .expect("must list")
        .into_iter()
        .map(|backup| backup.backup_id)
        .collect::<Vec<_>>();
    ids.sort();
    assert_eq!(
        ids,
        vec!["backup-20260101-000000", "backup-20260301-101500"]
    );

    let latest = manager.latest_backup(&fixture.project).expect("latest");
    assert_eq!(latest.backup_id, "backup-20260301-101500");
    assert_eq!(
        latest.created_at,
        Utc.with_ymd_and_hms(2026, 3, 1, 10, 15, 0)
            .single()
            .expect("valid instant")
    );

    let found = manager
        .find_backup(&fixture.project, "backup-20260101-000000")
        .expect("must find");
    assert_eq!(found.original_path, fixture.project);

    let err = manager
        .find_backup(&fixture.project, "backup-19990101-000000")
        .expect_err("unknown id");
    assert!(matches!(root_kind(&err), Error::BackupNotFound { .. }));
}

#[test]
fn latest_backup_without_backups_fails() {
    let fixture = Fixture::new();
    let err = BackupManager::new(&Dispatch::none())
        .latest_backup(&fixture.project)
        .expect_err("no backups");
    assert!(matches!(root_kind(&err), Error::NoBackups { .. }));
}

#[test]
fn prune_removes_only_backups_before_cutoff() {
    let fixture = Fixture::new();
    let parent = fixture.project.parent().expect("project has parent");
    let old = parent.join("project.backup-20260101-000000");
    let recent = parent.join("project.backup-20260901-000000");
    fs::create_dir_all(&old).expect("mkdir");
    fs::create_dir_all(&recent).expect("mkdir");

    let cutoff = Utc
        .with_ymd_and_hms(2026, 6, 1, 0, 0, 0)
        .single()
        .expect("valid instant");
    let removed = BackupManager::new(&Dispatch::none())
        .prune_before(&fixture.project, cutoff)
        .expect("prune must succeed");
    assert_eq!(removed, 1);
    assert!(!old.exists());
    assert!(recent.exists());
}

#[test]
fn backup_ids_follow_timestamp_format() {
    let instant = Utc
        .with_ymd_and_hms(2026, 10, 16, 8, 5, 9)
        .single()
        .expect("valid instant");
    let id = backup_id_for(instant);
    assert_eq!(id, "backup-20261016-080509");
    assert_eq!(parse_backup_id(&id), Some(instant));
    assert_eq!(parse_backup_id("backup-latest"), None);
}

#[test]
fn repository_source_requires_every_tree() {
    let fixture = Fixture::new();
    fixture.source().validate().expect("complete repo validates");

    fs::remove_dir_all(fixture.repo.join("agents")).expect("must remove agents");
    let err = fixture
        .source()
        .validate()
        .expect_err("missing agents must fail");
    assert!(matches!(root_kind(&err), Error::SourceMissing { .. }));

    let err = RepositorySource::new(fixture.repo.join("absent"))
        .validate()
        .expect_err("missing root must fail");
    assert!(matches!(root_kind(&err), Error::SourceMissing { .. }));
}

#[test]
fn archive_source_checks_tree_digest() {
    let fixture = Fixture::new();
    let digest = tree_digest_hex(&fixture.repo, &[]).expect("must hash");

    ArchiveSource::new(&fixture.repo)
        .with_integrity(integrity_token(&digest))
        .validate()
        .expect("matching digest validates");

    let err = ArchiveSource::new(&fixture.repo)
        .with_integrity(integrity_token(&"0".repeat(64)))
        .validate()
        .expect_err("wrong digest must fail");
    assert!(matches!(root_kind(&err), Error::IntegrityMismatch { .. }));

    let err = ArchiveSource::new(&fixture.repo)
        .with_integrity("md5-abc")
        .validate()
        .expect_err("malformed token must fail");
    assert!(err.to_string().contains("invalid integrity token"));
}

#[test]
fn embedded_source_serves_subtrees_and_manifest() {
    let manifest = manifest_json("0.0.72", &[], None);
    let source = EmbeddedSource::from_static(&[
        ("agents/analyst.md", b"# analyst\n".as_slice()),
        (".specify/version-manifest.json", manifest.as_bytes()),
        (".specify/templates/commands/plan.md", b"plan\n".as_slice()),
    ]);
    source.validate().expect("embedded bundle validates");
    assert_eq!(source.kind(), SourceKind::Embedded);
    assert_eq!(source.specify().expect("specify").file_count().expect("count"), 2);
    assert_eq!(
        source
            .manifest()
            .expect("manifest")
            .pinned_dependency()
            .expect("pinned")
            .version,
        v("0.0.72")
    );

    let missing = EmbeddedSource::from_static(&[("agents/analyst.md", b"# analyst\n".as_slice())]);
    let err = missing.validate().expect_err("missing trees must fail");
    assert!(matches!(root_kind(&err), Error::SourceMissing { .. }));
}

#[test]
fn prefixed_copy_flattens_and_filters() {
    let fixture = Fixture::new();
    let agents = fixture.home.join("agents");
    let copied = fixture
        .source()
        .agents()
        .expect("agents")
        .copy_prefixed(
            &agents,
            &PrefixedCopy {
                prefix: AGENT_FILE_PREFIX,
                extension: Some("md"),
                recursive: true,
            },
        )
        .expect("copy must succeed");
    assert_eq!(copied, 2);
    assert!(agents.join("cat-analyst.md").is_file());
    assert!(agents.join("cat-reviewer.md").is_file());
    assert!(!agents.join("cat-README.txt").exists());
}

#[test]
fn lock_save_is_atomic_and_loadable() {
    let fixture = Fixture::new();
    let path = fixture.project.join(VERSION_LOCK_FILE);
    let lock = VersionLock::create(&v("0.1.0"), &v("0.0.72"), &fixture.project);

    save_version_lock(&lock, &path).expect("save must succeed");
    assert!(!fixture.project.join(".version-lock.json.tmp").exists());
    assert_eq!(load_version_lock(&path).expect("load must succeed"), lock);

    let err = load_version_lock(&fixture.project.join("absent.json")).expect_err("missing");
    assert!(matches!(root_kind(&err), Error::LockNotFound { .. }));

    write_file(&path, "{ not json");
    let err = load_version_lock(&path).expect_err("corrupt");
    assert!(matches!(root_kind(&err), Error::CorruptLock { .. }));
}

#[test]
fn install_places_files_and_writes_lock() {
    let fixture = Fixture::new();
    let (dispatch, logs) = capture_dispatch();
    let source = fixture.source();
    let report = Lifecycle::new(fixture.env(), &source, v("0.1.0"), &dispatch)
        .install(&InstallOptions::default())
        .expect("install must succeed");

    assert_eq!(report.mode.kind, ModeKind::Fresh);
    assert_eq!(report.dependency_version, v("0.0.72"));
    assert_eq!(report.integration.agents_copied, 2);
    assert_eq!(report.integration.commands_copied, 2);
    assert_eq!(report.files_installed, 4);
    assert!(fixture
        .project
        .join(".specify/memory/constitution.md")
        .is_file());
    assert!(fixture.home.join(".claude/commands/speckit.plan.md").is_file());
    assert!(fixture.home.join(".claude/skills").is_dir());

    let lock = fixture.lock();
    assert_eq!(Some(lock.installation_id()), report.installation_id);
    assert_eq!(lock.bundle_version().expect("bundle"), &v("0.1.0"));
    assert_eq!(lock.dependency_version().expect("dependency"), &v("0.0.72"));
    assert_eq!(lock.history().len(), 1);
    assert!(logs
        .contents()
        .contains("[SUCCESS] [installer] Installation complete!"));
}

#[test]
fn install_dry_run_touches_nothing() {
    let fixture = Fixture::new();
    let source = fixture.source();
    let report = Lifecycle::new(fixture.env(), &source, v("0.1.0"), &Dispatch::none())
        .install(&InstallOptions {
            dry_run: true,
            ..InstallOptions::default()
        })
        .expect("dry run must succeed");

    assert!(report.dry_run);
    assert_eq!(report.installation_id, None);
    assert!(!fixture.project.join(VERSION_LOCK_FILE).exists());
    assert!(!fixture.project.join(SPECIFY_DIR).exists());
    assert!(!fixture.home.join(".claude").exists());
}

#[test]
fn install_over_existing_requires_force() {
    let fixture = Fixture::new();
    fixture.install("0.1.0");

    let (dispatch, logs) = capture_dispatch();
    let source = fixture.source();
    let err = Lifecycle::new(fixture.env(), &source, v("0.1.0"), &dispatch)
        .install(&InstallOptions::default())
        .expect_err("second install must fail");
    assert!(matches!(root_kind(&err), Error::AlreadyInstalled { .. }));
    assert!(err.to_string().contains("mode detection failed"));
    assert!(logs
        .contents()
        .contains("[WARN] [installer] Existing installation detected"));
}

#[test]
fn forced_reinstall_keeps_installation_id() {
    let fixture = Fixture::new();
    let first = fixture.install("0.1.0");

    let source = fixture.source();
    let second = Lifecycle::new(fixture.env(), &source, v("0.1.1"), &Dispatch::none())
        .install(&InstallOptions {
            force: true,
            ..InstallOptions::default()
        })
        .expect("forced install must succeed");

    assert_eq!(second.mode.kind, ModeKind::Upgrade);
    assert_eq!(second.installation_id, first.installation_id);
    let lock = fixture.lock();
    assert_eq!(lock.history().len(), 2);
    assert_eq!(
        lock.last_history_entry().map(|entry| entry.action),
        Some(HistoryAction::Upgrade)
    );
    assert_eq!(lock.bundle_version().expect("bundle"), &v("0.1.1"));
}

#[test]
fn install_into_project_with_unmanaged_specify_coexists() {
    let fixture = Fixture::new();
    write_file(&fixture.project.join(".specify/own.md"), "user owned");

    let report = fixture.install("0.1.0");
    assert_eq!(report.mode.kind, ModeKind::Coexist);
    let prefix = fixture.project.join(COEXIST_PREFIX);
    assert!(prefix.join(VERSION_LOCK_FILE).is_file());
    assert!(prefix.join(".specify/memory/constitution.md").is_file());
    assert_eq!(
        fs::read_to_string(fixture.project.join(".specify/own.md")).expect("must read"),
        "user owned"
    );
}

#[test]
fn global_install_is_rejected() {
    let fixture = Fixture::new();
    let source = fixture.source();
    let err = Lifecycle::new(fixture.env(), &source, v("0.1.0"), &Dispatch::none())
        .install(&InstallOptions {
            global: true,
            ..InstallOptions::default()
        })
        .expect_err("global must fail");
    assert!(matches!(root_kind(&err), Error::GlobalInstallUnsupported));
}

#[test]
fn install_verifies_declared_integrity() {
    let fixture = Fixture::new();
    let token = tree_integrity_token(&fixture.repo.join(SPECIFY_DIR), &[MANIFEST_FILE])
        .expect("must hash");
    fixture.set_manifest(&manifest_json("0.0.72", &[], Some(&token)));
    fixture.install("0.1.0");

    let other = Fixture::new();
    other.set_manifest(&manifest_json(
        "0.0.72",
        &[],
        Some(&integrity_token(&"a".repeat(64))),
    ));
    let source = other.source();
    let err = Lifecycle::new(other.env(), &source, v("0.1.0"), &Dispatch::none())
        .install(&InstallOptions::default())
        .expect_err("tampered tree must fail");
    assert!(matches!(root_kind(&err), Error::IntegrityMismatch { .. }));
    assert!(err.to_string().contains("file placement failed"));
    assert!(!other.project.join(VERSION_LOCK_FILE).exists());
}

#[test]
fn check_records_verification_and_detects_range_violation() {
    let fixture = Fixture::new();
    fixture.install("0.1.0");
    let source = fixture.source();
    let lifecycle = Lifecycle::new(fixture.env(), &source, v("0.1.0"), &Dispatch::none());

    let result = lifecycle.check(None).expect("fresh install is compatible");
    assert!(result.is_compatible());
    assert!(!result.has_issues());
    let lock = fixture.lock();
    assert!(lock.last_verified().is_some());
    let entry = lock.last_history_entry().expect("verify entry");
    assert_eq!(entry.action, HistoryAction::Verify);
    assert_eq!(entry.status, HistoryStatus::Success);

    let mut lock = fixture.lock();
    lock.set_component(
        DEPENDENCY_COMPONENT,
        Component {
            version: v("0.2.0"),
            installed_from: InstallSource::Vendored,
            commit: None,
            install_path: ".specify".to_string(),
        },
    );
    save_version_lock(&lock, &fixture.project.join(VERSION_LOCK_FILE)).expect("save");

    let err = lifecycle.check(None).expect_err("0.2.0 is outside the window");
    match root_kind(&err) {
        Error::CompatibilityViolation { version, issues } => {
            assert_eq!(version, "0.2.0");
            assert!(issues
                .iter()
                .any(|issue| issue.contains("outside allowed range 0.0.70 - 0.1.0")));
        }
        other => panic!("expected compatibility violation, got {other:?}"),
    }
    let entry = fixture.lock();
    let entry = entry.last_history_entry().expect("failed verify entry");
    assert_eq!(entry.status, HistoryStatus::Failure);
    assert!(entry.error.is_some());
}

#[test]
fn check_without_installation_reports_not_installed() {
    let fixture = Fixture::new();
    let source = fixture.source();
    let err = Lifecycle::new(fixture.env(), &source, v("0.1.0"), &Dispatch::none())
        .check(None)
        .expect_err("nothing installed");
    assert!(matches!(root_kind(&err), Error::NotInstalled { .. }));
}

#[test]
fn status_reports_installed_and_missing() {
    let fixture = Fixture::new();
    let source = fixture.source();
    let lifecycle = Lifecycle::new(fixture.env(), &source, v("0.1.0"), &Dispatch::none());

    let missing = lifecycle.status(None).expect("status without install");
    assert!(!missing.installed);
    assert_eq!(missing.history_count, 0);

    fixture.install("0.1.0");
    let status = lifecycle.status(None).expect("status");
    assert!(status.installed);
    assert_eq!(status.bundle_version, Some(v("0.1.0")));
    assert_eq!(status.dependency_version, Some(v("0.0.72")));
    assert_eq!(status.history_count, 1);
}

#[test]
fn update_at_target_version_is_a_no_op() {
    let fixture = Fixture::new();
    fixture.install("0.1.0");
    let source = fixture.source();
    let lifecycle = Lifecycle::new(fixture.env(), &source, v("0.1.0"), &Dispatch::none());

    let report = lifecycle
        .update(&UpdateOptions::default())
        .expect("no-op update must succeed");
    assert!(!report.updated);
    assert!(report.note.is_some());
    assert_eq!(report.backup_id, None);
    assert!(lifecycle.list_backups(None).expect("list").is_empty());
    assert_eq!(fixture.lock().history().len(), 1);
}

#[test]
fn update_backs_up_and_upgrades() {
    let fixture = Fixture::new();
    let first = fixture.install("0.1.0");
    let source = fixture.source();
    let lifecycle = Lifecycle::new(fixture.env(), &source, v("0.2.0"), &Dispatch::none());

    let report = lifecycle
        .update(&UpdateOptions::default())
        .expect("update must succeed");
    assert!(report.updated);
    assert_eq!(report.previous_bundle_version, v("0.1.0"));
    assert_eq!(report.bundle_version, v("0.2.0"));

    let lock = fixture.lock();
    assert_eq!(Some(lock.installation_id()), first.installation_id);
    assert_eq!(lock.bundle_version().expect("bundle"), &v("0.2.0"));

    let backups = lifecycle.list_backups(None).expect("list");
    assert_eq!(backups.len(), 1);
    assert_eq!(Some(backups[0].backup_id.clone()), report.backup_id);
    assert!(lifecycle.can_rollback(None).expect("can rollback").is_some());
}

#[test]
fn update_rejects_incompatible_target() {
    let fixture = Fixture::new();
    fixture.install("0.1.0");
    fixture.set_manifest(&manifest_json("0.0.73", &["0.0.73"], None));
    let source = fixture.source();
    let lifecycle = Lifecycle::new(fixture.env(), &source, v("0.2.0"), &Dispatch::none());

    let err = lifecycle
        .update(&UpdateOptions::default())
        .expect_err("breaking target must be rejected");
    assert!(matches!(root_kind(&err), Error::CompatibilityViolation { .. }));
    assert!(lifecycle.list_backups(None).expect("list").is_empty());

    let report = lifecycle
        .update(&UpdateOptions {
            skip_verify: true,
            skip_backup: true,
            ..UpdateOptions::default()
        })
        .expect("skipping verification allows the update");
    assert!(report.updated);
    assert_eq!(report.dependency_version, v("0.0.73"));
}

#[test]
fn failed_update_restores_backup() {
    let fixture = Fixture::new();
    fixture.install("0.1.0");

    let manifest = manifest_json("0.0.72", &[], None);
    let broken = EmbeddedSource::from_static(&[
        (".specify/version-manifest.json", manifest.as_bytes()),
        (".specify/templates/commands/plan.md", b"plan\n".as_slice()),
    ]);
    let (dispatch, logs) = capture_dispatch();
    let err = Lifecycle::new(fixture.env(), &broken, v("0.2.0"), &dispatch)
        .update(&UpdateOptions::default())
        .expect_err("update without agents must fail");

    assert!(matches!(root_kind(&err), Error::UpdateRolledBack { .. }));
    assert!(logs
        .contents()
        .contains("[WARN] [rollback] Attempting automatic rollback"));
    assert_eq!(fixture.lock().bundle_version().expect("bundle"), &v("0.1.0"));
}

#[test]
fn failed_forced_update_restores_tree_byte_for_byte() {
    let fixture = Fixture::new();
    fixture.install("0.1.0");
    let before = snapshot_tree(&fixture.project);
    assert!(before.contains_key(Path::new(VERSION_LOCK_FILE)));

    write_file(
        &fixture.repo.join(".specify/memory/constitution.md"),
        "# constitution v2\n",
    );
    let agents_dir = fixture.home.join(".claude/agents");
    fs::remove_dir_all(&agents_dir).expect("must remove agents dir");
    write_file(&agents_dir, "blocks integration");

    let source = fixture.source();
    let err = Lifecycle::new(fixture.env(), &source, v("0.1.0"), &Dispatch::none())
        .update(&UpdateOptions {
            force: true,
            ..UpdateOptions::default()
        })
        .expect_err("integration must fail after the tree is placed");

    match root_kind(&err) {
        Error::UpdateRolledBack { cause } => assert!(cause.contains("integration failed")),
        other => panic!("expected rolled back update, got {other:?}"),
    }
    assert_eq!(snapshot_tree(&fixture.project), before);
}

#[test]
fn failed_restore_requires_manual_intervention() {
    let fixture = Fixture::new();
    fixture.install("0.1.0");
    let parent = fixture.project.parent().expect("project has parent");
    let backup = BackupInfo {
        backup_id: "backup-20000101-000000".to_string(),
        backup_path: parent.join("project.backup-20000101-000000"),
        original_path: fixture.project.clone(),
        created_at: Utc
            .with_ymd_and_hms(2000, 1, 1, 0, 0, 0)
            .single()
            .expect("valid instant"),
        component_name: BUNDLE_COMPONENT.to_string(),
        size_bytes: None,
    };

    let source = fixture.source();
    let err = Lifecycle::new(fixture.env(), &source, v("0.2.0"), &Dispatch::none())
        .auto_rollback(&backup, anyhow::anyhow!("integration failed"));
    let kind = root_kind(&err);
    match kind {
        Error::RollbackFailed {
            cause,
            rollback_error,
        } => {
            assert_eq!(cause, "integration failed");
            assert!(rollback_error.contains("project.backup-20000101-000000"));
        }
        other => panic!("expected rollback failure, got {other:?}"),
    }
    assert!(kind.requires_manual_intervention());
}

#[test]
fn update_after_file_removed_from_pinned_source() {
    let fixture = Fixture::new();
    write_file(&fixture.repo.join(".specify/memory/old-notes.md"), "old notes\n");
    let pin = |fixture: &Fixture| {
        let token = tree_integrity_token(&fixture.repo.join(SPECIFY_DIR), &[MANIFEST_FILE])
            .expect("must hash");
        fixture.set_manifest(&manifest_json("0.0.72", &[], Some(&token)));
    };
    pin(&fixture);
    fixture.install("0.1.0");
    assert!(fixture.project.join(".specify/memory/old-notes.md").is_file());

    fs::remove_file(fixture.repo.join(".specify/memory/old-notes.md")).expect("must remove");
    pin(&fixture);

    let source = fixture.source();
    let report = Lifecycle::new(fixture.env(), &source, v("0.2.0"), &Dispatch::none())
        .update(&UpdateOptions::default())
        .expect("re-pinned update must succeed");
    assert!(report.updated);
    assert_eq!(fixture.lock().bundle_version().expect("bundle"), &v("0.2.0"));
    assert_eq!(
        fs::read_to_string(fixture.project.join(SPECIFY_DIR).join(MANIFEST_FILE))
            .expect("must read manifest"),
        fs::read_to_string(fixture.repo.join(SPECIFY_DIR).join(MANIFEST_FILE))
            .expect("must read manifest")
    );
}

#[test]
fn pinned_reinstall_keeps_user_files_under_specify() {
    let fixture = Fixture::new();
    let token = tree_integrity_token(&fixture.repo.join(SPECIFY_DIR), &[MANIFEST_FILE])
        .expect("must hash");
    fixture.set_manifest(&manifest_json("0.0.72", &[], Some(&token)));
    fixture.install("0.1.0");
    write_file(&fixture.project.join(".specify/memory/team.md"), "ours\n");

    let source = fixture.source();
    Lifecycle::new(fixture.env(), &source, v("0.1.1"), &Dispatch::none())
        .install(&InstallOptions {
            force: true,
            ..InstallOptions::default()
        })
        .expect("forced pinned reinstall must succeed");
    assert_eq!(
        fs::read_to_string(fixture.project.join(".specify/memory/team.md")).expect("must read"),
        "ours\n"
    );
}

#[test]
fn corrupt_lock_still_counts_as_installed() {
    let fixture = Fixture::new();
    fixture.install("0.1.0");
    write_file(&fixture.project.join(VERSION_LOCK_FILE), "{ not json");

    assert_eq!(detect_mode(&fixture.env(), None).kind, ModeKind::Upgrade);

    let source = fixture.source();
    let lifecycle = Lifecycle::new(fixture.env(), &source, v("0.1.0"), &Dispatch::none());
    let err = lifecycle.status(None).expect_err("corrupt lock must surface");
    assert!(matches!(root_kind(&err), Error::CorruptLock { .. }));

    let err = lifecycle
        .install(&InstallOptions::default())
        .expect_err("plain install must not overwrite");
    assert!(matches!(root_kind(&err), Error::AlreadyInstalled { .. }));

    lifecycle
        .install(&InstallOptions {
            force: true,
            ..InstallOptions::default()
        })
        .expect("forced install replaces the lock");
    assert_eq!(fixture.lock().history().len(), 1);
}

#[test]
fn rollback_restores_latest_backup_and_records_entry() {
    let fixture = Fixture::new();
    fixture.install("0.1.0");
    let source = fixture.source();
    Lifecycle::new(fixture.env(), &source, v("0.2.0"), &Dispatch::none())
        .update(&UpdateOptions::default())
        .expect("update must succeed");

    let lifecycle = Lifecycle::new(fixture.env(), &source, v("0.2.0"), &Dispatch::none());
    let report = lifecycle
        .rollback(&RollbackOptions::default())
        .expect("rollback must succeed");
    assert_eq!(report.previous_version, Some(v("0.2.0")));
    assert_eq!(report.restored_version, Some(v("0.1.0")));
    assert_eq!(report.component_count, 2);
    assert!(report.history_recorded);

    let lock = fixture.lock();
    assert_eq!(lock.bundle_version().expect("bundle"), &v("0.1.0"));
    let entry = lock.last_history_entry().expect("rollback entry");
    assert_eq!(entry.action, HistoryAction::Rollback);
    assert_eq!(entry.component, "all");
    assert_eq!(entry.version, Some(v("0.1.0")));
}

#[test]
fn rollback_with_unknown_id_fails() {
    let fixture = Fixture::new();
    fixture.install("0.1.0");
    let source = fixture.source();
    let err = Lifecycle::new(fixture.env(), &source, v("0.1.0"), &Dispatch::none())
        .rollback(&RollbackOptions {
            backup_id: Some("backup-20000101-000000".to_string()),
            ..RollbackOptions::default()
        })
        .expect_err("unknown id must fail");
    assert!(matches!(root_kind(&err), Error::BackupNotFound { .. }));
}

#[test]
fn check_for_updates_compares_pinned_versions() {
    let fixture = Fixture::new();
    fixture.install("0.1.0");
    fixture.set_manifest(&manifest_json("0.0.75", &[], None));
    let source = fixture.source();
    let check = Lifecycle::new(fixture.env(), &source, v("0.1.0"), &Dispatch::none())
        .check_for_updates(None)
        .expect("check must succeed");
    assert_eq!(check.current, v("0.0.72"));
    assert_eq!(check.available, v("0.0.75"));
    assert!(check.availability.is_available());
}

#[test]
fn prune_backups_respects_max_age() {
    let fixture = Fixture::new();
    let parent = fixture.project.parent().expect("project has parent");
    fs::create_dir_all(parent.join("project.backup-20000101-000000")).expect("mkdir");
    let source = fixture.source();
    let lifecycle = Lifecycle::new(fixture.env(), &source, v("0.1.0"), &Dispatch::none());

    assert_eq!(
        lifecycle
            .prune_backups(None, Duration::days(30))
            .expect("prune"),
        1
    );
    assert!(lifecycle.can_rollback(None).expect("can rollback").is_none());
}

#[test]
fn file_writer_appends_tagged_lines() {
    let fixture = Fixture::new();
    let path = fixture.project.join("logs/install.log");
    let (writer, guard) = file_writer(&path).expect("must open log");
    let dispatch = Dispatch::new(
        tracing_subscriber::registry()
            .with(LevelFilter::INFO)
            .with(line_layer(writer)),
    );
    tracing::dispatcher::with_default(&dispatch, || {
        debug!(component = "backup", "hidden");
        info!(component = "backup", success = true, "Backup created");
    });
    drop(guard);

    let contents = fs::read_to_string(&path).expect("must read log");
    assert!(contents.contains("[SUCCESS] [backup] Backup created"));
    assert!(!contents.contains("hidden"));
}

#[test]
fn events_without_component_use_the_default() {
    let (dispatch, logs) = capture_dispatch();
    tracing::dispatcher::with_default(&dispatch, || {
        tracing::warn!("plain warning");
        tracing::error!(fatal = true, component = "cli", "giving up");
    });
    let contents = logs.contents();
    assert!(contents.contains(&format!("[WARN] [{DEFAULT_COMPONENT}] plain warning")));
    assert!(contents.contains("[FATAL] [cli] giving up"));
}
