// tests/integration_test.rs

//! Integration tests for Airlift
//!
//! These tests verify the end-to-end install lifecycle across modules,
//! including crash recovery across simulated process restarts (the database
//! connection is dropped and reopened from the same file).

use airlift::db;
use airlift::db::models::{InstallMode, InstallOptions, PackageMetadata, ReportingStatus};
use airlift::lifecycle::{self, StartupContext, StartupOutcome};
use airlift::manager::PackageManager;
use airlift::reporting::ReportingManager;
use airlift::{manifest, signing};
use tempfile::TempDir;

struct Harness {
    _root: TempDir,
    db_path: String,
    deployments_dir: String,
    secret: String,
    public: String,
}

impl Harness {
    fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let db_path = root.path().join("airlift.db").to_str().unwrap().to_string();
        let deployments_dir = root
            .path()
            .join("deployments")
            .to_str()
            .unwrap()
            .to_string();
        std::fs::create_dir_all(&deployments_dir).unwrap();
        db::init(&db_path).unwrap();

        let (secret, public) = signing::generate_keypair();
        Self {
            _root: root,
            db_path,
            deployments_dir,
            secret,
            public,
        }
    }

    /// Open a fresh connection, as a new process launch would
    fn open(&self) -> (PackageManager, ReportingManager) {
        let conn = db::open(&self.db_path).unwrap();
        let manager = PackageManager::new(conn, &self.deployments_dir);
        let reporter = ReportingManager::new(manager.share_connection());
        (manager, reporter)
    }

    fn start(
        &self,
        manager: &PackageManager,
        reporter: &ReportingManager,
        build: &str,
    ) -> StartupOutcome {
        lifecycle::handle_app_start(
            manager,
            reporter,
            &StartupContext {
                binary_build_time: build,
                app_version: "1.0.0",
                deployment_key: Some("host-key"),
            },
        )
        .unwrap()
    }

    fn package(&self, hash: &str, native_build_time: &str) -> PackageMetadata {
        PackageMetadata {
            deployment_key: "deploy-key".to_string(),
            description: None,
            label: format!("v-{}", hash),
            app_version: "1.0.0".to_string(),
            is_mandatory: false,
            package_hash: hash.to_string(),
            package_size: 2048,
            local_path: format!("pkg-{}", hash),
            native_build_time: native_build_time.to_string(),
        }
    }

    /// Write a package directory and run the verify-and-stage path
    fn stage(&self, manager: &PackageManager, metadata: &PackageMetadata) -> PackageMetadata {
        let dir = manager.package_dir(&metadata.local_path);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("index.html"), "<html></html>").unwrap();

        let content = manifest::serialize_package_manifest(metadata);
        let token = signing::sign_manifest(content.as_bytes(), &self.secret).unwrap();
        manager
            .verify_and_stage(
                &metadata.local_path,
                &content,
                &token,
                &self.public,
                &InstallOptions::new(InstallMode::OnNextRestart),
            )
            .unwrap()
    }
}

#[test]
fn test_database_lifecycle() {
    let harness = Harness::new();

    assert!(std::path::Path::new(&harness.db_path).exists());
    let conn = db::open(&harness.db_path).unwrap();
    let result: Result<i32, _> = conn.query_row("SELECT 1", [], |row| row.get(0));
    assert_eq!(result.unwrap(), 1, "Should be able to execute queries");
}

#[test]
fn test_first_launch_reports_store_version() {
    let harness = Harness::new();
    let (manager, reporter) = harness.open();

    let outcome = harness.start(&manager, &reporter, "100");
    assert_eq!(outcome, StartupOutcome::FreshBinary);
    assert!(manager.is_binary_first_run().unwrap());
    assert_eq!(manager.cached_binary_hash().unwrap().as_deref(), Some("100"));

    let report = reporter.get_and_clear_failed_report().unwrap().unwrap();
    assert_eq!(report.status, ReportingStatus::StoreVersion);
    assert_eq!(report.app_version, "1.0.0");
    assert_eq!(report.deployment_key.as_deref(), Some("host-key"));
}

#[test]
fn test_crash_recovery_rolls_back_unconfirmed_install() {
    let harness = Harness::new();

    // Launch 1: establish the binary, install and confirm a first package
    let (manager, reporter) = harness.open();
    harness.start(&manager, &reporter, "100");
    let first = harness.stage(&manager, &harness.package("first", "100"));
    manager.apply(&first).unwrap();
    lifecycle::confirm_install(&manager, &reporter).unwrap();
    reporter.get_and_clear_failed_report().unwrap();

    // Stage and apply a second package, then "crash" before confirming
    let second = harness.stage(&manager, &harness.package("abc123", "100"));
    manager.apply(&second).unwrap();
    assert!(manager.install_needs_confirmation().unwrap());
    drop((manager, reporter));

    // Launch 2: recovery detects the unconfirmed install
    let (manager, reporter) = harness.open();
    let outcome = harness.start(&manager, &reporter, "100");
    assert_eq!(outcome, StartupOutcome::RolledBack);

    // The prior package is current again, the failed hash is blacklisted
    assert_eq!(manager.current_package().unwrap().unwrap(), first);
    assert!(manager.previous_package().unwrap().is_none());
    assert!(manager.is_failed_update("abc123").unwrap());
    assert!(!manager.install_needs_confirmation().unwrap());
    assert!(!manager.package_dir(&second.local_path).exists());

    // A rollback report names what failed and what was restored
    let report = reporter.get_and_clear_failed_report().unwrap().unwrap();
    assert_eq!(report.status, ReportingStatus::UpdateRolledBack);
    assert_eq!(report.label.as_deref(), Some("v-abc123"));
    assert_eq!(report.deployment_key.as_deref(), Some("deploy-key"));
    assert_eq!(report.last_version_label.as_deref(), Some("v-first"));

    // Re-staging the blacklisted hash is rejected outright
    let dir = manager.package_dir("pkg-abc123");
    std::fs::create_dir_all(&dir).unwrap();
    let content =
        manifest::serialize_package_manifest(&harness.package("abc123", "100"));
    let token = signing::sign_manifest(content.as_bytes(), &harness.secret).unwrap();
    let result = manager.verify_and_stage(
        "pkg-abc123",
        &content,
        &token,
        &harness.public,
        &InstallOptions::new(InstallMode::Immediate),
    );
    assert!(matches!(
        result,
        Err(airlift::Error::BlacklistedPackage(h)) if h == "abc123"
    ));
}

#[test]
fn test_confirmation_survives_restart() {
    let harness = Harness::new();

    // Launch 1: install and confirm
    let (manager, reporter) = harness.open();
    harness.start(&manager, &reporter, "100");
    reporter.get_and_clear_failed_report().unwrap();

    let package = harness.stage(&manager, &harness.package("abc123", "100"));
    manager.apply(&package).unwrap();
    lifecycle::confirm_install(&manager, &reporter).unwrap();

    assert!(!manager.install_needs_confirmation().unwrap());
    let report = reporter.get_and_clear_failed_report().unwrap().unwrap();
    assert_eq!(report.status, ReportingStatus::UpdateConfirmed);
    assert_eq!(report.label.as_deref(), Some("v-abc123"));
    drop((manager, reporter));

    // Launch 2: no rollback, no duplicate confirmation report
    let (manager, reporter) = harness.open();
    let outcome = harness.start(&manager, &reporter, "100");
    assert_eq!(outcome, StartupOutcome::Normal);
    assert_eq!(manager.current_package().unwrap().unwrap(), package);
    assert!(reporter.get_failed_report().unwrap().is_none());
}

#[test]
fn test_binary_change_clears_package_state_but_keeps_blacklist() {
    let harness = Harness::new();

    // Launch 1 on build 100: a package is current, another is blacklisted
    let (manager, reporter) = harness.open();
    harness.start(&manager, &reporter, "100");
    let package = harness.stage(&manager, &harness.package("abc123", "100"));
    manager.apply(&package).unwrap();
    lifecycle::confirm_install(&manager, &reporter).unwrap();
    manager.save_failed_update("badbad").unwrap();
    manager
        .save_pending_install(&InstallOptions::new(InstallMode::OnNextResume))
        .unwrap();
    drop((manager, reporter));

    // Launch 2 on build 200: the store released a new binary
    let (manager, reporter) = harness.open();
    let outcome = harness.start(&manager, &reporter, "200");
    assert_eq!(outcome, StartupOutcome::FreshBinary);

    assert!(manager.current_package().unwrap().is_none());
    assert!(manager.previous_package().unwrap().is_none());
    assert!(manager.get_pending_install().unwrap().is_none());
    assert!(!manager.install_needs_confirmation().unwrap());
    assert!(manager.is_binary_first_run().unwrap());
    assert_eq!(manager.cached_binary_hash().unwrap().as_deref(), Some("200"));

    // Package directories targeting the old binary are gone
    assert!(!manager.package_dir(&package.local_path).exists());

    // Past failures still apply across binary updates
    assert!(manager.is_failed_update("badbad").unwrap());
}

#[test]
fn test_tampered_manifest_never_becomes_current() {
    let harness = Harness::new();
    let (manager, reporter) = harness.open();
    harness.start(&manager, &reporter, "100");

    let metadata = harness.package("abc123", "100");
    let dir = manager.package_dir(&metadata.local_path);
    std::fs::create_dir_all(&dir).unwrap();

    // Sign one manifest, deliver another
    let signed_content = manifest::serialize_package_manifest(&metadata);
    let token = signing::sign_manifest(signed_content.as_bytes(), &harness.secret).unwrap();
    let tampered = signed_content.replace("abc123", "evil99");

    let result = manager.verify_and_stage(
        "pkg-abc123",
        &tampered,
        &token,
        &harness.public,
        &InstallOptions::new(InstallMode::Immediate),
    );
    assert!(matches!(
        result,
        Err(airlift::Error::SignatureVerification(_))
    ));

    // Nothing recorded, artifact deleted
    assert!(manager.current_package().unwrap().is_none());
    assert!(manager.previous_package().unwrap().is_none());
    assert!(manager.get_pending_install().unwrap().is_none());
    assert!(!dir.exists());
}

#[test]
fn test_package_first_run_consumed_once_per_install() {
    let harness = Harness::new();
    let (manager, reporter) = harness.open();
    harness.start(&manager, &reporter, "100");

    let package = harness.stage(&manager, &harness.package("abc123", "100"));
    manager.apply(&package).unwrap();
    drop((manager, reporter));

    // The marker survives the restart and reads true exactly once
    let (manager, _reporter) = harness.open();
    assert!(manager.take_package_first_run().unwrap());
    assert!(!manager.take_package_first_run().unwrap());
}

#[test]
fn test_staged_install_waits_for_its_trigger() {
    let harness = Harness::new();
    let (manager, reporter) = harness.open();
    harness.start(&manager, &reporter, "100");

    let metadata = harness.package("abc123", "100");
    let dir = manager.package_dir(&metadata.local_path);
    std::fs::create_dir_all(&dir).unwrap();

    let content = manifest::serialize_package_manifest(&metadata);
    let token = signing::sign_manifest(content.as_bytes(), &harness.secret).unwrap();
    let mut options = InstallOptions::new(InstallMode::OnNextResume);
    options.min_background_duration = Some(300);
    manager
        .verify_and_stage(&metadata.local_path, &content, &token, &harness.public, &options)
        .unwrap();

    // The lifecycle collaborator polls the staged options against signals
    let staged = manager.get_pending_install().unwrap().unwrap();
    assert!(!lifecycle::applies_on(
        &staged,
        &lifecycle::LifecycleEvent::Resume {
            background_duration_secs: 60
        }
    ));
    assert!(lifecycle::applies_on(
        &staged,
        &lifecycle::LifecycleEvent::Resume {
            background_duration_secs: 300
        }
    ));

    // A short resume left the install staged; a long one applies it
    manager.apply(&metadata).unwrap();
    assert!(manager.get_pending_install().unwrap().is_none());
    assert_eq!(manager.current_package().unwrap().unwrap(), metadata);
}

#[test]
fn test_rollback_to_unmodified_binary() {
    let harness = Harness::new();

    // Only one package was ever installed; its failure reverts to the binary
    let (manager, reporter) = harness.open();
    harness.start(&manager, &reporter, "100");
    let package = harness.stage(&manager, &harness.package("abc123", "100"));
    manager.apply(&package).unwrap();
    drop((manager, reporter));

    let (manager, reporter) = harness.open();
    let outcome = harness.start(&manager, &reporter, "100");
    assert_eq!(outcome, StartupOutcome::RolledBack);
    assert!(manager.current_package().unwrap().is_none());
    assert!(manager.is_failed_update("abc123").unwrap());

    // Restarting again recovers nothing further
    drop((manager, reporter));
    let (manager, reporter) = harness.open();
    let outcome = harness.start(&manager, &reporter, "100");
    assert_eq!(outcome, StartupOutcome::Normal);
    assert!(manager.current_package().unwrap().is_none());
}
