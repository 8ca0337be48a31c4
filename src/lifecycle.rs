// src/lifecycle.rs

//! Install lifecycle: startup recovery, binary-change detection, triggers
//!
//! The state machine per install attempt is
//! `Verified -> Staged -> Applied (needs confirmation) -> Confirmed | RolledBack`.
//!
//! [`handle_app_start`] must run once at every process start before any
//! other operation: it is the sole automatic failure-detection mechanism.
//! An install applied in the previous launch but never confirmed is treated
//! as failed, blacklisted, and rolled back. The core never observes
//! resume/suspend/restart itself; an external collaborator feeds those in
//! as [`LifecycleEvent`]s and asks [`applies_on`] whether the staged
//! install should fire.

use crate::db::models::{
    InstallMode, InstallOptions, PackageMetadata, ReportingStatus, StatusReport,
};
use crate::error::Result;
use crate::manager::PackageManager;
use crate::reporting::ReportingManager;
use tracing::{info, warn};

/// Application lifecycle signal supplied by the host runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Cold start of the application
    Restart,
    /// Return to foreground after the given time in background
    Resume { background_duration_secs: i64 },
    /// The application is about to move to background
    Suspend,
}

/// Host binary identity observed at process start
#[derive(Debug, Clone, Copy)]
pub struct StartupContext<'a> {
    /// Build identifier of the running binary
    pub binary_build_time: &'a str,
    /// Version of the running binary
    pub app_version: &'a str,
    /// Deployment key configured for this binary, if any
    pub deployment_key: Option<&'a str>,
}

/// What [`handle_app_start`] found and did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupOutcome {
    /// The binary itself changed; package-level state was reset
    FreshBinary,
    /// The previous launch applied an install that was never confirmed;
    /// it was blacklisted and rolled back
    RolledBack,
    /// Nothing to recover
    Normal,
}

/// Decide whether a staged install should fire on a lifecycle signal
///
/// Immediate installs fire on any signal. OnNextResume honors the staged
/// minimum background duration: a resume before that threshold leaves the
/// install staged. Enforcement of `rollback_timeout` after apply is the
/// collaborator's job; this core only stores it.
pub fn applies_on(options: &InstallOptions, event: &LifecycleEvent) -> bool {
    match options.install_mode {
        InstallMode::Immediate => true,
        InstallMode::OnNextRestart => matches!(event, LifecycleEvent::Restart),
        InstallMode::OnNextResume => match event {
            LifecycleEvent::Resume {
                background_duration_secs,
            } => *background_duration_secs >= options.min_background_duration.unwrap_or(0),
            _ => false,
        },
        InstallMode::OnNextSuspend => matches!(event, LifecycleEvent::Suspend),
    }
}

/// Run the startup recovery rule
///
/// Checks for a binary change first, then for an applied-but-unconfirmed
/// install, and finally enqueues the confirmation report exactly once per
/// confirmed install.
pub fn handle_app_start(
    manager: &PackageManager,
    reporter: &ReportingManager,
    ctx: &StartupContext,
) -> Result<StartupOutcome> {
    let cached = manager.cached_binary_hash()?;
    if cached.as_deref() != Some(ctx.binary_build_time) {
        return handle_binary_change(manager, reporter, ctx, cached.is_some());
    }

    if manager.install_needs_confirmation()? {
        return handle_unconfirmed_install(manager, reporter);
    }

    // Confirmed current package: report it once
    if let Some(current) = manager.current_package()? {
        let already_reported =
            manager.last_reported_package_hash()?.as_deref() == Some(current.package_hash.as_str());
        if !already_reported {
            reporter.enqueue(confirmed_report(&current))?;
            manager.save_last_reported_package_hash(&current.package_hash)?;
        }
    }
    Ok(StartupOutcome::Normal)
}

/// The binary was replaced (store release) or this is the first ever launch
///
/// All package-level state is invalidated: the packages targeted the old
/// binary. The failed-update blacklist is kept; past failures still apply
/// across binary updates.
fn handle_binary_change(
    manager: &PackageManager,
    reporter: &ReportingManager,
    ctx: &StartupContext,
    had_cached_hash: bool,
) -> Result<StartupOutcome> {
    if had_cached_hash {
        info!(
            "Binary changed (build {}); clearing package state",
            ctx.binary_build_time
        );
    } else {
        info!("First launch of build {}", ctx.binary_build_time);
    }

    manager.clear_package_state()?;
    manager.clean_deployments()?;
    manager.save_binary_hash(ctx.binary_build_time)?;
    manager.save_binary_first_run_flag()?;

    reporter.enqueue(StatusReport::new(
        ReportingStatus::StoreVersion,
        None,
        ctx.app_version.to_string(),
        ctx.deployment_key.map(str::to_string),
    ))?;

    Ok(StartupOutcome::FreshBinary)
}

/// The previous launch applied an install that was never confirmed
fn handle_unconfirmed_install(
    manager: &PackageManager,
    reporter: &ReportingManager,
) -> Result<StartupOutcome> {
    let Some(failed) = manager.current_package()? else {
        // Flag with nothing applied; drop it
        warn!("Confirmation flag set with no current package");
        manager.clear_install_needs_confirmation()?;
        return Ok(StartupOutcome::Normal);
    };

    warn!(
        "Package {} ({}) was applied but never confirmed; rolling back",
        failed.label, failed.package_hash
    );

    manager.save_failed_update(&failed.package_hash)?;
    manager.revert_to_previous_version()?;
    manager.clear_install_needs_confirmation()?;

    let mut report = StatusReport::new(
        ReportingStatus::UpdateRolledBack,
        Some(failed.label.clone()),
        failed.app_version.clone(),
        Some(failed.deployment_key.clone()),
    );
    // Name what was rolled back to, when a package is still current
    if let Some(restored) = manager.current_package()? {
        report.last_version_label = Some(restored.label);
        report.last_version_deployment_key = Some(restored.deployment_key);
    }
    reporter.enqueue(report)?;

    Ok(StartupOutcome::RolledBack)
}

/// Explicit acknowledgment that the applied package booted successfully
///
/// Clears the confirmation flag, deletes the package that was replaced,
/// and enqueues the UPDATE_CONFIRMED report (once per install).
pub fn confirm_install(manager: &PackageManager, reporter: &ReportingManager) -> Result<()> {
    manager.clear_install_needs_confirmation()?;
    manager.clean_old_package()?;

    if let Some(current) = manager.current_package()? {
        info!("Install of {} confirmed", current.package_hash);
        let already_reported =
            manager.last_reported_package_hash()?.as_deref() == Some(current.package_hash.as_str());
        if !already_reported {
            reporter.enqueue(confirmed_report(&current))?;
            manager.save_last_reported_package_hash(&current.package_hash)?;
        }
    }
    Ok(())
}

fn confirmed_report(package: &PackageMetadata) -> StatusReport {
    StatusReport::new(
        ReportingStatus::UpdateConfirmed,
        Some(package.label.clone()),
        package.app_version.clone(),
        Some(package.deployment_key.clone()),
    )
}
