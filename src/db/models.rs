// src/db/models.rs

//! Data models for Airlift database entities
//!
//! This module defines Rust structs that correspond to database tables
//! and provides methods for creating, reading, updating, and deleting
//! records. Records that fail to decode degrade to the safe default
//! (no package / no pending install / flag unset) with a warning rather
//! than propagating a crash.

use crate::error::Result;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::warn;

/// Flag key: build identifier of the binary that last ran
pub const FLAG_BINARY_HASH: &str = "binary_hash";
/// Flag key: set when the running binary differs from the cached one
pub const FLAG_BINARY_FIRST_RUN: &str = "binary_first_run";
/// Flag key: set when the current package changes, consumed on first read
pub const FLAG_PACKAGE_FIRST_RUN: &str = "package_first_run";
/// Flag key: an applied install has not yet been confirmed
pub const FLAG_INSTALL_NEEDS_CONFIRMATION: &str = "install_needs_confirmation";
/// Flag key: hash of the package whose confirmation was last reported
pub const FLAG_LAST_REPORTED_HASH: &str = "last_reported_package_hash";
/// Flag key: label (or app version) recorded at the last confirmed report
pub const FLAG_LAST_VERSION_LABEL: &str = "last_version_label";
/// Flag key: deployment key recorded at the last confirmed report
pub const FLAG_LAST_VERSION_DEPLOYMENT_KEY: &str = "last_version_deployment_key";

/// Package metadata slot (current or previous)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageSlot {
    Current,
    Previous,
}

impl PackageSlot {
    pub fn as_str(&self) -> &str {
        match self {
            PackageSlot::Current => "current",
            PackageSlot::Previous => "previous",
        }
    }
}

impl FromStr for PackageSlot {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "current" => Ok(PackageSlot::Current),
            "previous" => Ok(PackageSlot::Previous),
            _ => Err(format!("Invalid package slot: {}", s)),
        }
    }
}

/// Metadata for one installed (or previously installed) content package
///
/// The serde form is the manifest wire form produced by the release tooling
/// (camelCase keys, description optional).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageMetadata {
    pub deployment_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub label: String,
    pub app_version: String,
    pub is_mandatory: bool,
    pub package_hash: String,
    pub package_size: i64,
    pub local_path: String,
    pub native_build_time: String,
}

impl PackageMetadata {
    /// Write this metadata into a slot, replacing whatever occupied it
    pub fn save(&self, conn: &Connection, slot: PackageSlot) -> Result<()> {
        conn.execute(
            "INSERT OR REPLACE INTO packages
                (slot, deployment_key, description, label, app_version,
                 is_mandatory, package_hash, package_size, local_path, native_build_time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                slot.as_str(),
                &self.deployment_key,
                &self.description,
                &self.label,
                &self.app_version,
                self.is_mandatory,
                &self.package_hash,
                self.package_size,
                &self.local_path,
                &self.native_build_time,
            ],
        )?;
        Ok(())
    }

    /// Load the metadata occupying a slot
    ///
    /// Returns None if the slot is empty or its record is corrupt.
    pub fn load(conn: &Connection, slot: PackageSlot) -> Result<Option<Self>> {
        let mut stmt = conn.prepare(
            "SELECT deployment_key, description, label, app_version, is_mandatory,
                    package_hash, package_size, local_path, native_build_time
             FROM packages WHERE slot = ?1",
        )?;

        let package = stmt
            .query_row([slot.as_str()], Self::from_row)
            .optional()?;

        match package {
            Some(p) if p.package_size < 0 || p.label.is_empty() || p.app_version.is_empty() => {
                warn!(
                    "Discarding corrupt {} package record (hash {})",
                    slot.as_str(),
                    p.package_hash
                );
                Ok(None)
            }
            other => Ok(other),
        }
    }

    /// Clear a slot; a no-op if the slot is already empty
    pub fn delete(conn: &Connection, slot: PackageSlot) -> Result<()> {
        conn.execute("DELETE FROM packages WHERE slot = ?1", [slot.as_str()])?;
        Ok(())
    }

    /// Move the previous package into the current slot
    ///
    /// The current slot must already be empty. A no-op if previous is empty,
    /// which leaves the store in the "running the unmodified binary" state.
    pub fn promote_previous(conn: &Connection) -> Result<()> {
        conn.execute(
            "UPDATE packages SET slot = 'current' WHERE slot = 'previous'",
            [],
        )?;
        Ok(())
    }

    /// Convert a database row to a PackageMetadata
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            deployment_key: row.get(0)?,
            description: row.get(1)?,
            label: row.get(2)?,
            app_version: row.get(3)?,
            is_mandatory: row.get(4)?,
            package_hash: row.get(5)?,
            package_size: row.get(6)?,
            local_path: row.get(7)?,
            native_build_time: row.get(8)?,
        })
    }
}

/// When a staged install should actually be applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallMode {
    /// Apply as soon as the caller invokes apply, then restart
    Immediate,
    /// Apply only when the app is next cold-started
    OnNextRestart,
    /// Apply when the app returns to foreground after a long enough background
    OnNextResume,
    /// Apply at the moment the app is about to background
    OnNextSuspend,
}

impl InstallMode {
    pub fn as_str(&self) -> &str {
        match self {
            InstallMode::Immediate => "immediate",
            InstallMode::OnNextRestart => "on_next_restart",
            InstallMode::OnNextResume => "on_next_resume",
            InstallMode::OnNextSuspend => "on_next_suspend",
        }
    }
}

impl FromStr for InstallMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "immediate" => Ok(InstallMode::Immediate),
            "on_next_restart" => Ok(InstallMode::OnNextRestart),
            "on_next_resume" => Ok(InstallMode::OnNextResume),
            "on_next_suspend" => Ok(InstallMode::OnNextSuspend),
            _ => Err(format!("Invalid install mode: {}", s)),
        }
    }
}

/// Options for a staged-but-not-yet-applied install
///
/// `min_background_duration` gates the OnNextResume trigger;
/// `rollback_timeout` is stored for the lifecycle collaborator that arms
/// the post-apply confirmation timer. Both are independent and optional.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOptions {
    pub install_mode: InstallMode,
    pub min_background_duration: Option<i64>,
    pub rollback_timeout: Option<i64>,
}

impl InstallOptions {
    pub fn new(install_mode: InstallMode) -> Self {
        Self {
            install_mode,
            min_background_duration: None,
            rollback_timeout: None,
        }
    }

    /// Persist as the single staged install, overwriting any prior staging
    pub fn save(&self, conn: &Connection) -> Result<()> {
        conn.execute(
            "INSERT OR REPLACE INTO pending_install
                (id, install_mode, min_background_duration, rollback_timeout)
             VALUES (1, ?1, ?2, ?3)",
            params![
                self.install_mode.as_str(),
                self.min_background_duration,
                self.rollback_timeout,
            ],
        )?;
        Ok(())
    }

    /// Load the staged install, or None if nothing is staged
    ///
    /// A record with an unrecognized install mode is treated as no pending
    /// install.
    pub fn load(conn: &Connection) -> Result<Option<Self>> {
        let row: Option<(String, Option<i64>, Option<i64>)> = conn
            .query_row(
                "SELECT install_mode, min_background_duration, rollback_timeout
                 FROM pending_install WHERE id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let Some((mode_str, min_background_duration, rollback_timeout)) = row else {
            return Ok(None);
        };

        match mode_str.parse::<InstallMode>() {
            Ok(install_mode) => Ok(Some(Self {
                install_mode,
                min_background_duration,
                rollback_timeout,
            })),
            Err(e) => {
                warn!("Discarding corrupt pending install: {}", e);
                Ok(None)
            }
        }
    }

    /// Clear the staged install; idempotent
    pub fn clear(conn: &Connection) -> Result<()> {
        conn.execute("DELETE FROM pending_install WHERE id = 1", [])?;
        Ok(())
    }
}

/// Outcome of the most recent install, as reported to telemetry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportingStatus {
    StoreVersion,
    UpdateConfirmed,
    UpdateRolledBack,
}

impl ReportingStatus {
    pub fn as_str(&self) -> &str {
        match self {
            ReportingStatus::StoreVersion => "store_version",
            ReportingStatus::UpdateConfirmed => "update_confirmed",
            ReportingStatus::UpdateRolledBack => "update_rolled_back",
        }
    }

    /// Numeric wire value used in the telemetry payload
    pub fn value(&self) -> i64 {
        match self {
            ReportingStatus::StoreVersion => 0,
            ReportingStatus::UpdateConfirmed => 1,
            ReportingStatus::UpdateRolledBack => 2,
        }
    }
}

impl FromStr for ReportingStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "store_version" => Ok(ReportingStatus::StoreVersion),
            "update_confirmed" => Ok(ReportingStatus::UpdateConfirmed),
            "update_rolled_back" => Ok(ReportingStatus::UpdateRolledBack),
            _ => Err(format!("Invalid reporting status: {}", s)),
        }
    }
}

/// A status report pending transmission to telemetry
///
/// The last-version fields are populated only for rollback reports and
/// identify what was rolled back to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub status: ReportingStatus,
    pub label: Option<String>,
    pub app_version: String,
    pub deployment_key: Option<String>,
    pub last_version_label: Option<String>,
    pub last_version_deployment_key: Option<String>,
}

impl StatusReport {
    pub fn new(
        status: ReportingStatus,
        label: Option<String>,
        app_version: String,
        deployment_key: Option<String>,
    ) -> Self {
        Self {
            status,
            label,
            app_version,
            deployment_key,
            last_version_label: None,
            last_version_deployment_key: None,
        }
    }

    /// Persist as the single pending report, overwriting an unread older one
    pub fn save(&self, conn: &Connection) -> Result<()> {
        conn.execute(
            "INSERT OR REPLACE INTO status_report
                (id, status, label, app_version, deployment_key,
                 last_version_label, last_version_deployment_key)
             VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                self.status.as_str(),
                &self.label,
                &self.app_version,
                &self.deployment_key,
                &self.last_version_label,
                &self.last_version_deployment_key,
            ],
        )?;
        Ok(())
    }

    /// Load the pending report, or None if there is none (or it is corrupt)
    pub fn load(conn: &Connection) -> Result<Option<Self>> {
        let row: Option<(
            String,
            Option<String>,
            String,
            Option<String>,
            Option<String>,
            Option<String>,
        )> = conn
            .query_row(
                "SELECT status, label, app_version, deployment_key,
                        last_version_label, last_version_deployment_key
                 FROM status_report WHERE id = 1",
                [],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                    ))
                },
            )
            .optional()?;

        let Some((status_str, label, app_version, deployment_key, lv_label, lv_key)) = row else {
            return Ok(None);
        };

        match status_str.parse::<ReportingStatus>() {
            Ok(status) => Ok(Some(Self {
                status,
                label,
                app_version,
                deployment_key,
                last_version_label: lv_label,
                last_version_deployment_key: lv_key,
            })),
            Err(e) => {
                warn!("Discarding corrupt status report: {}", e);
                Ok(None)
            }
        }
    }

    /// Clear the pending report; idempotent
    pub fn clear(conn: &Connection) -> Result<()> {
        conn.execute("DELETE FROM status_report WHERE id = 1", [])?;
        Ok(())
    }

    /// Telemetry wire form with the original numeric status values
    pub fn to_json(&self) -> serde_json::Value {
        let mut obj = serde_json::json!({
            "status": self.status.value(),
            "appVersion": self.app_version,
        });
        let map = obj.as_object_mut().unwrap();
        if let Some(label) = &self.label {
            map.insert("label".to_string(), label.as_str().into());
        }
        if let Some(key) = &self.deployment_key {
            map.insert("deploymentKey".to_string(), key.as_str().into());
        }
        if let Some(label) = &self.last_version_label {
            map.insert(
                "lastVersionLabelOrAppVersion".to_string(),
                label.as_str().into(),
            );
        }
        if let Some(key) = &self.last_version_deployment_key {
            map.insert("lastVersionDeploymentKey".to_string(), key.as_str().into());
        }
        obj
    }
}

/// Read a durable flag; None if unset
pub fn get_flag(conn: &Connection, key: &str) -> Result<Option<String>> {
    let value = conn
        .query_row("SELECT value FROM flags WHERE key = ?1", [key], |row| {
            row.get(0)
        })
        .optional()?;
    Ok(value)
}

/// Set a durable flag, replacing any prior value
pub fn set_flag(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO flags (key, value) VALUES (?1, ?2)",
        params![key, value],
    )?;
    Ok(())
}

/// Unset a durable flag; idempotent
pub fn delete_flag(conn: &Connection, key: &str) -> Result<()> {
    conn.execute("DELETE FROM flags WHERE key = ?1", [key])?;
    Ok(())
}

/// Add a package hash to the failed-update blacklist
pub fn save_failed_update(conn: &Connection, package_hash: &str) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO failed_updates (package_hash) VALUES (?1)",
        [package_hash],
    )?;
    Ok(())
}

/// Check whether a package hash previously failed to boot
pub fn is_failed_update(conn: &Connection, package_hash: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM failed_updates WHERE package_hash = ?1",
        [package_hash],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// List all blacklisted package hashes
pub fn list_failed_updates(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt =
        conn.prepare("SELECT package_hash FROM failed_updates ORDER BY failed_at, package_hash")?;
    let hashes = stmt
        .query_map([], |row| row.get(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(hashes)
}

/// Empty the failed-update blacklist; idempotent
pub fn clear_failed_updates(conn: &Connection) -> Result<()> {
    conn.execute("DELETE FROM failed_updates", [])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn test_package(hash: &str) -> PackageMetadata {
        PackageMetadata {
            deployment_key: "deploy-key".to_string(),
            description: Some("test package".to_string()),
            label: "v7".to_string(),
            app_version: "1.2.0".to_string(),
            is_mandatory: false,
            package_hash: hash.to_string(),
            package_size: 4096,
            local_path: format!("pkg-{}", hash),
            native_build_time: "1700000000".to_string(),
        }
    }

    #[test]
    fn test_package_slot_round_trip() {
        let conn = db::open_in_memory().unwrap();
        let package = test_package("abc123");

        package.save(&conn, PackageSlot::Current).unwrap();
        let loaded = PackageMetadata::load(&conn, PackageSlot::Current)
            .unwrap()
            .unwrap();
        assert_eq!(loaded, package);

        // The other slot stays empty
        assert!(
            PackageMetadata::load(&conn, PackageSlot::Previous)
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_save_replaces_slot_occupant() {
        let conn = db::open_in_memory().unwrap();
        test_package("one").save(&conn, PackageSlot::Current).unwrap();
        test_package("two").save(&conn, PackageSlot::Current).unwrap();

        let loaded = PackageMetadata::load(&conn, PackageSlot::Current)
            .unwrap()
            .unwrap();
        assert_eq!(loaded.package_hash, "two");

        // At most one row per slot
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM packages", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_promote_previous() {
        let conn = db::open_in_memory().unwrap();
        test_package("prev").save(&conn, PackageSlot::Previous).unwrap();

        PackageMetadata::promote_previous(&conn).unwrap();

        let current = PackageMetadata::load(&conn, PackageSlot::Current)
            .unwrap()
            .unwrap();
        assert_eq!(current.package_hash, "prev");
        assert!(
            PackageMetadata::load(&conn, PackageSlot::Previous)
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_corrupt_package_record_degrades_to_none() {
        let conn = db::open_in_memory().unwrap();
        let mut bad = test_package("bad");
        bad.package_size = -1;
        bad.save(&conn, PackageSlot::Current).unwrap();

        assert!(
            PackageMetadata::load(&conn, PackageSlot::Current)
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_install_options_round_trip() {
        let conn = db::open_in_memory().unwrap();
        let mut options = InstallOptions::new(InstallMode::OnNextResume);
        options.min_background_duration = Some(120);
        options.rollback_timeout = Some(30);

        options.save(&conn).unwrap();
        assert_eq!(InstallOptions::load(&conn).unwrap(), Some(options));
    }

    #[test]
    fn test_install_options_overwrite_and_clear() {
        let conn = db::open_in_memory().unwrap();
        InstallOptions::new(InstallMode::Immediate).save(&conn).unwrap();
        InstallOptions::new(InstallMode::OnNextSuspend)
            .save(&conn)
            .unwrap();

        let loaded = InstallOptions::load(&conn).unwrap().unwrap();
        assert_eq!(loaded.install_mode, InstallMode::OnNextSuspend);

        // Clearing twice observes the same state as clearing once
        InstallOptions::clear(&conn).unwrap();
        InstallOptions::clear(&conn).unwrap();
        assert!(InstallOptions::load(&conn).unwrap().is_none());
    }

    #[test]
    fn test_corrupt_install_mode_degrades_to_none() {
        let conn = db::open_in_memory().unwrap();
        conn.execute(
            "INSERT INTO pending_install (id, install_mode) VALUES (1, 'on_blue_moon')",
            [],
        )
        .unwrap();

        assert!(InstallOptions::load(&conn).unwrap().is_none());
    }

    #[test]
    fn test_status_report_overwrites_unread_report() {
        let conn = db::open_in_memory().unwrap();
        StatusReport::new(
            ReportingStatus::UpdateConfirmed,
            Some("v1".to_string()),
            "1.0.0".to_string(),
            Some("key".to_string()),
        )
        .save(&conn)
        .unwrap();

        let mut rollback = StatusReport::new(
            ReportingStatus::UpdateRolledBack,
            Some("v2".to_string()),
            "1.0.0".to_string(),
            Some("key".to_string()),
        );
        rollback.last_version_label = Some("v1".to_string());
        rollback.save(&conn).unwrap();

        let loaded = StatusReport::load(&conn).unwrap().unwrap();
        assert_eq!(loaded.status, ReportingStatus::UpdateRolledBack);
        assert_eq!(loaded.last_version_label.as_deref(), Some("v1"));
    }

    #[test]
    fn test_status_report_wire_form() {
        let mut report = StatusReport::new(
            ReportingStatus::UpdateRolledBack,
            Some("v3".to_string()),
            "2.0.0".to_string(),
            Some("key".to_string()),
        );
        report.last_version_label = Some("v2".to_string());
        report.last_version_deployment_key = Some("key".to_string());

        let json = report.to_json();
        assert_eq!(json["status"], 2);
        assert_eq!(json["label"], "v3");
        assert_eq!(json["appVersion"], "2.0.0");
        assert_eq!(json["lastVersionLabelOrAppVersion"], "v2");
    }

    #[test]
    fn test_flags() {
        let conn = db::open_in_memory().unwrap();
        assert_eq!(get_flag(&conn, FLAG_BINARY_HASH).unwrap(), None);

        set_flag(&conn, FLAG_BINARY_HASH, "100").unwrap();
        set_flag(&conn, FLAG_BINARY_HASH, "200").unwrap();
        assert_eq!(
            get_flag(&conn, FLAG_BINARY_HASH).unwrap().as_deref(),
            Some("200")
        );

        delete_flag(&conn, FLAG_BINARY_HASH).unwrap();
        delete_flag(&conn, FLAG_BINARY_HASH).unwrap();
        assert_eq!(get_flag(&conn, FLAG_BINARY_HASH).unwrap(), None);
    }

    #[test]
    fn test_failed_updates_membership_and_clear() {
        let conn = db::open_in_memory().unwrap();
        assert!(!is_failed_update(&conn, "abc123").unwrap());

        save_failed_update(&conn, "abc123").unwrap();
        save_failed_update(&conn, "abc123").unwrap();
        save_failed_update(&conn, "def456").unwrap();

        assert!(is_failed_update(&conn, "abc123").unwrap());
        assert_eq!(list_failed_updates(&conn).unwrap().len(), 2);

        clear_failed_updates(&conn).unwrap();
        clear_failed_updates(&conn).unwrap();
        assert!(!is_failed_update(&conn, "abc123").unwrap());
        assert!(list_failed_updates(&conn).unwrap().is_empty());
    }
}
