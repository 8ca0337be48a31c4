// src/db/schema.rs

//! Database schema definitions and migrations for Airlift
//!
//! This module defines the SQLite schema for all core tables and provides
//! a migration system to evolve the schema over time.

use crate::error::Result;
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// Initialize the schema version tracking table
fn init_schema_version(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;
    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> Result<i32> {
    init_schema_version(conn)?;

    let version = conn
        .query_row(
            "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    Ok(version)
}

/// Set the schema version
fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT INTO schema_version (version) VALUES (?1)",
        [version],
    )?;
    Ok(())
}

/// Apply all pending migrations to bring the database up to date
pub fn migrate(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;
    debug!("Current schema version: {}", current_version);

    if current_version >= SCHEMA_VERSION {
        debug!("Schema is up to date");
        return Ok(());
    }

    // Apply migrations in order
    for version in (current_version + 1)..=SCHEMA_VERSION {
        info!("Applying migration to version {}", version);
        apply_migration(conn, version)?;
        set_schema_version(conn, version)?;
    }

    info!(
        "Schema migration complete. Now at version {}",
        SCHEMA_VERSION
    );
    Ok(())
}

/// Apply a specific migration version
fn apply_migration(conn: &Connection, version: i32) -> Result<()> {
    match version {
        1 => migrate_v1(conn),
        2 => migrate_v2(conn),
        _ => panic!("Unknown migration version: {}", version),
    }
}

/// Initial schema - Version 1
///
/// Creates all core tables for Airlift:
/// - packages: Two-slot package metadata (current and previous)
/// - flags: Small durable booleans/strings (first-run markers, cached
///   binary hash, pending-confirmation flag)
/// - failed_updates: Blacklist of package hashes that failed to boot
/// - pending_install: The single staged-but-not-applied install
/// - status_report: The single pending telemetry report
fn migrate_v1(conn: &Connection) -> Result<()> {
    debug!("Creating schema version 1");

    conn.execute_batch(
        "
        -- Packages: at most one row per slot
        CREATE TABLE packages (
            slot TEXT PRIMARY KEY CHECK(slot IN ('current', 'previous')),
            deployment_key TEXT NOT NULL,
            description TEXT,
            label TEXT NOT NULL,
            app_version TEXT NOT NULL,
            is_mandatory INTEGER NOT NULL DEFAULT 0,
            package_hash TEXT NOT NULL,
            package_size INTEGER NOT NULL,
            local_path TEXT NOT NULL,
            native_build_time TEXT NOT NULL,
            installed_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );

        CREATE INDEX idx_packages_hash ON packages(package_hash);

        -- Flags: durable key/value markers
        CREATE TABLE flags (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        -- Failed updates: package hashes barred from re-installation
        CREATE TABLE failed_updates (
            package_hash TEXT PRIMARY KEY,
            failed_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );

        -- Pending install: single-row table holding the staged install
        CREATE TABLE pending_install (
            id INTEGER PRIMARY KEY CHECK(id = 1),
            install_mode TEXT NOT NULL,
            staged_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );

        -- Status report: single-row table holding the pending report
        CREATE TABLE status_report (
            id INTEGER PRIMARY KEY CHECK(id = 1),
            status TEXT NOT NULL CHECK(status IN
                ('store_version', 'update_confirmed', 'update_rolled_back')),
            label TEXT,
            app_version TEXT NOT NULL,
            deployment_key TEXT,
            last_version_label TEXT,
            last_version_deployment_key TEXT,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );
        ",
    )?;

    info!("Schema version 1 created successfully");
    Ok(())
}

/// Schema Version 2: Add timing constraints to the pending install
///
/// Earlier releases persisted only the install mode. Installs staged before
/// this migration keep their mode and read both timing fields as absent.
fn migrate_v2(conn: &Connection) -> Result<()> {
    debug!("Migrating to schema version 2");

    conn.execute_batch(
        "
        ALTER TABLE pending_install ADD COLUMN min_background_duration INTEGER;
        ALTER TABLE pending_install ADD COLUMN rollback_timeout INTEGER;
        ",
    )?;

    info!("Schema version 2 applied successfully");
    Ok(())
}
