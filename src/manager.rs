// src/manager.rs

//! Package manager: metadata slots, staging, apply, revert, and cleanup
//!
//! [`PackageManager`] owns the persistence layer behind a single lock, so
//! every read-modify-write sequence (check blacklist then stage, demote
//! current then apply) is atomic with respect to the other actors: the
//! background download task and the foreground lifecycle observer.
//! Multi-record mutations additionally run inside a database transaction,
//! so a crash mid-operation never leaves the store half-written.

use crate::db;
use crate::db::models::{self, InstallOptions, PackageMetadata, PackageSlot};
use crate::error::{Error, Result};
use crate::manifest;
use crate::signing;
use rusqlite::Connection;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Manages package metadata, the staged install, durable flags, the
/// failed-update blacklist, and on-disk package directories
pub struct PackageManager {
    conn: Arc<Mutex<Connection>>,
    deployments_dir: PathBuf,
}

impl PackageManager {
    /// Create a manager over an open database connection
    ///
    /// `deployments_dir` holds one subdirectory per package; a package's
    /// `local_path` is its subdirectory name.
    pub fn new(conn: Connection, deployments_dir: impl Into<PathBuf>) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            deployments_dir: deployments_dir.into(),
        }
    }

    /// Share the underlying connection (for the reporting manager)
    pub fn share_connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    pub fn deployments_dir(&self) -> &Path {
        &self.deployments_dir
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // Recover the connection if a previous holder panicked
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Resolve a package's on-disk directory
    pub fn package_dir(&self, local_path: &str) -> PathBuf {
        self.deployments_dir.join(local_path)
    }

    /// Delete a package directory; a no-op if it does not exist
    fn remove_package_dir(&self, local_path: &str) -> Result<()> {
        if local_path.is_empty() || local_path.contains("..") {
            warn!("Refusing to delete suspicious package path: {}", local_path);
            return Ok(());
        }
        let dir = self.package_dir(local_path);
        if dir.exists() {
            debug!("Deleting package directory: {}", dir.display());
            std::fs::remove_dir_all(&dir)?;
        }
        Ok(())
    }

    // --- Metadata store ---

    /// The active package, or None when running the unmodified binary
    pub fn current_package(&self) -> Result<Option<PackageMetadata>> {
        PackageMetadata::load(&self.lock(), PackageSlot::Current)
    }

    /// The package the current one replaced, if any
    pub fn previous_package(&self) -> Result<Option<PackageMetadata>> {
        PackageMetadata::load(&self.lock(), PackageSlot::Previous)
    }

    /// Delete the previous package's directory and metadata record
    ///
    /// A no-op if no previous package exists.
    pub fn clean_old_package(&self) -> Result<()> {
        let previous = {
            let conn = self.lock();
            let previous = PackageMetadata::load(&conn, PackageSlot::Previous)?;
            PackageMetadata::delete(&conn, PackageSlot::Previous)?;
            previous
        };
        if let Some(previous) = previous {
            self.remove_package_dir(&previous.local_path)?;
        }
        Ok(())
    }

    /// Promote the previous package to current
    ///
    /// The former current's record is removed first and its directory is
    /// deleted only after the promotion has committed. If no previous
    /// package exists this resets to running the unmodified binary.
    /// Returns the metadata of the package that was reverted away from.
    pub fn revert_to_previous_version(&self) -> Result<Option<PackageMetadata>> {
        let former_current = {
            let mut conn = self.lock();
            db::transaction(&mut conn, |tx| {
                let former = PackageMetadata::load(tx, PackageSlot::Current)?;
                PackageMetadata::delete(tx, PackageSlot::Current)?;
                PackageMetadata::promote_previous(tx)?;
                if former.is_some() {
                    // The active package changed
                    models::set_flag(tx, models::FLAG_PACKAGE_FIRST_RUN, "true")?;
                }
                Ok(former)
            })?
        };
        if let Some(former) = &former_current {
            info!("Reverted away from package {}", former.package_hash);
            self.remove_package_dir(&former.local_path)?;
        }
        Ok(former_current)
    }

    /// Drop all package-level state in one transaction
    ///
    /// Clears both metadata slots, the staged install, and every
    /// package-scoped flag. The failed-update blacklist is left intact.
    /// Used when the host binary itself was replaced.
    pub fn clear_package_state(&self) -> Result<()> {
        let mut conn = self.lock();
        db::transaction(&mut conn, |tx| {
            PackageMetadata::delete(tx, PackageSlot::Current)?;
            PackageMetadata::delete(tx, PackageSlot::Previous)?;
            InstallOptions::clear(tx)?;
            models::delete_flag(tx, models::FLAG_INSTALL_NEEDS_CONFIRMATION)?;
            models::delete_flag(tx, models::FLAG_PACKAGE_FIRST_RUN)?;
            models::delete_flag(tx, models::FLAG_LAST_REPORTED_HASH)?;
            Ok(())
        })
    }

    /// Remove any deployment directory not referenced by current or previous
    ///
    /// Defensive cleanup of partial or orphaned installs.
    pub fn clean_deployments(&self) -> Result<()> {
        let referenced: HashSet<String> = {
            let conn = self.lock();
            [PackageSlot::Current, PackageSlot::Previous]
                .iter()
                .filter_map(|slot| PackageMetadata::load(&conn, *slot).transpose())
                .collect::<Result<Vec<_>>>()?
                .into_iter()
                .map(|p| p.local_path)
                .collect()
        };

        if !self.deployments_dir.exists() {
            return Ok(());
        }
        for entry in std::fs::read_dir(&self.deployments_dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !referenced.contains(&name) {
                info!("Removing orphaned deployment: {}", name);
                std::fs::remove_dir_all(entry.path())?;
            }
        }
        Ok(())
    }

    // --- Install staging ---

    /// Verify a downloaded package and stage it for install
    ///
    /// Checks the signed token against the public key, parses the manifest
    /// strictly, rejects blacklisted hashes, then persists the install
    /// options. On any failure the downloaded directory is deleted and
    /// nothing is recorded.
    pub fn verify_and_stage(
        &self,
        local_dir: &str,
        manifest_content: &str,
        signed_token: &str,
        public_key: &str,
        options: &InstallOptions,
    ) -> Result<PackageMetadata> {
        let result =
            self.verify_and_stage_inner(local_dir, manifest_content, signed_token, public_key, options);
        if let Err(e) = &result {
            warn!("Rejecting downloaded package {}: {}", local_dir, e);
            if let Err(cleanup) = self.remove_package_dir(local_dir) {
                warn!("Failed to delete rejected package: {}", cleanup);
            }
        }
        result
    }

    fn verify_and_stage_inner(
        &self,
        local_dir: &str,
        manifest_content: &str,
        signed_token: &str,
        public_key: &str,
        options: &InstallOptions,
    ) -> Result<PackageMetadata> {
        signing::verify_manifest(manifest_content.as_bytes(), signed_token, public_key)?;
        let metadata = manifest::parse_package_manifest(manifest_content)?;

        if metadata.local_path != local_dir {
            return Err(Error::ManifestParse(format!(
                "manifest localPath '{}' does not match downloaded directory '{}'",
                metadata.local_path, local_dir
            )));
        }

        // Blacklist check and staging are one critical section
        let conn = self.lock();
        if models::is_failed_update(&conn, &metadata.package_hash)? {
            return Err(Error::BlacklistedPackage(metadata.package_hash));
        }
        options.save(&conn)?;

        info!(
            "Staged package {} ({}) for install ({})",
            metadata.label,
            metadata.package_hash,
            options.install_mode.as_str()
        );
        Ok(metadata)
    }

    pub fn save_pending_install(&self, options: &InstallOptions) -> Result<()> {
        options.save(&self.lock())
    }

    pub fn get_pending_install(&self) -> Result<Option<InstallOptions>> {
        InstallOptions::load(&self.lock())
    }

    pub fn clear_pending_install(&self) -> Result<()> {
        InstallOptions::clear(&self.lock())
    }

    // --- Apply ---

    /// Make a verified package the current one
    ///
    /// In one transaction: the current package demotes to previous, the new
    /// metadata becomes current, the needs-confirmation flag is set, the
    /// staged install is consumed, and the package-first-run marker is set.
    /// The evicted previous package's directory is deleted after commit.
    pub fn apply(&self, metadata: &PackageMetadata) -> Result<()> {
        let evicted = {
            let mut conn = self.lock();
            db::transaction(&mut conn, |tx| {
                let evicted = PackageMetadata::load(tx, PackageSlot::Previous)?;
                if let Some(current) = PackageMetadata::load(tx, PackageSlot::Current)? {
                    current.save(tx, PackageSlot::Previous)?;
                } else {
                    PackageMetadata::delete(tx, PackageSlot::Previous)?;
                }
                metadata.save(tx, PackageSlot::Current)?;
                models::set_flag(tx, models::FLAG_INSTALL_NEEDS_CONFIRMATION, "true")?;
                models::set_flag(tx, models::FLAG_PACKAGE_FIRST_RUN, "true")?;
                InstallOptions::clear(tx)?;
                Ok(evicted)
            })?
        };

        info!(
            "Applied package {} ({}), awaiting confirmation",
            metadata.label, metadata.package_hash
        );
        if let Some(evicted) = evicted {
            // Keep the directory if the evicted record pointed at a path a
            // live slot still references
            if evicted.local_path != metadata.local_path {
                self.remove_package_dir(&evicted.local_path)?;
            }
        }
        Ok(())
    }

    // --- Confirmation flag ---

    /// Persisted before control returns, so a crash right after apply is
    /// still detectable at the next start
    pub fn mark_install_needs_confirmation(&self) -> Result<()> {
        models::set_flag(&self.lock(), models::FLAG_INSTALL_NEEDS_CONFIRMATION, "true")
    }

    pub fn install_needs_confirmation(&self) -> Result<bool> {
        Ok(models::get_flag(&self.lock(), models::FLAG_INSTALL_NEEDS_CONFIRMATION)?.is_some())
    }

    pub fn clear_install_needs_confirmation(&self) -> Result<()> {
        models::delete_flag(&self.lock(), models::FLAG_INSTALL_NEEDS_CONFIRMATION)
    }

    // --- Failed-update blacklist ---

    pub fn save_failed_update(&self, package_hash: &str) -> Result<()> {
        models::save_failed_update(&self.lock(), package_hash)
    }

    pub fn is_failed_update(&self, package_hash: &str) -> Result<bool> {
        models::is_failed_update(&self.lock(), package_hash)
    }

    pub fn failed_updates(&self) -> Result<Vec<String>> {
        models::list_failed_updates(&self.lock())
    }

    pub fn clear_failed_updates(&self) -> Result<()> {
        models::clear_failed_updates(&self.lock())
    }

    // --- Binary / first-run flags ---

    /// Build identifier of the binary that last ran, if recorded
    pub fn cached_binary_hash(&self) -> Result<Option<String>> {
        models::get_flag(&self.lock(), models::FLAG_BINARY_HASH)
    }

    pub fn save_binary_hash(&self, binary_hash: &str) -> Result<()> {
        models::set_flag(&self.lock(), models::FLAG_BINARY_HASH, binary_hash)
    }

    pub fn is_binary_first_run(&self) -> Result<bool> {
        Ok(models::get_flag(&self.lock(), models::FLAG_BINARY_FIRST_RUN)?.is_some())
    }

    pub fn save_binary_first_run_flag(&self) -> Result<()> {
        models::set_flag(&self.lock(), models::FLAG_BINARY_FIRST_RUN, "true")
    }

    pub fn clear_binary_first_run_flag(&self) -> Result<()> {
        models::delete_flag(&self.lock(), models::FLAG_BINARY_FIRST_RUN)
    }

    /// Consume-once check for "the current package just changed"
    ///
    /// Returns true exactly once after a successful install or a revert.
    pub fn take_package_first_run(&self) -> Result<bool> {
        let conn = self.lock();
        let set = models::get_flag(&conn, models::FLAG_PACKAGE_FIRST_RUN)?.is_some();
        if set {
            models::delete_flag(&conn, models::FLAG_PACKAGE_FIRST_RUN)?;
        }
        Ok(set)
    }

    /// Set the package-first-run marker (install and revert paths)
    pub fn save_package_first_run_flag(&self) -> Result<()> {
        models::set_flag(&self.lock(), models::FLAG_PACKAGE_FIRST_RUN, "true")
    }

    /// Hash of the package whose confirmation was last reported
    ///
    /// Guards against reporting UPDATE_CONFIRMED more than once per install.
    pub fn last_reported_package_hash(&self) -> Result<Option<String>> {
        models::get_flag(&self.lock(), models::FLAG_LAST_REPORTED_HASH)
    }

    pub fn save_last_reported_package_hash(&self, package_hash: &str) -> Result<()> {
        models::set_flag(&self.lock(), models::FLAG_LAST_REPORTED_HASH, package_hash)
    }
}
