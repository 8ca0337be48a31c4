// src/reporting.rs

//! Status reporting: one pending telemetry event per install outcome
//!
//! The reporter persists at most one [`StatusReport`] describing the outcome
//! of the most recent install (confirmed / rolled back / fresh store
//! version). The report survives process death until the caller's telemetry
//! transport accepts it; a transport failure retains it for retry at the
//! next launch. It also tracks the "last version" identity that rollback
//! reports carry.

use crate::db;
use crate::db::models::{self, ReportingStatus, StatusReport};
use crate::error::Result;
use rusqlite::Connection;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Error type produced by a telemetry transport
pub type TransportError = Box<dyn std::error::Error + Send + Sync>;

/// External telemetry transport collaborator
pub trait TelemetrySink {
    /// Transmit a report; Err means the report must be retained for retry
    fn send(&self, report: &StatusReport) -> std::result::Result<(), TransportError>;
}

/// Records and replays the pending install-outcome report
pub struct ReportingManager {
    conn: Arc<Mutex<Connection>>,
}

impl ReportingManager {
    /// Create a reporter over the shared persistence connection
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Persist a report for later transmission
    ///
    /// A newer report overwrites an unread older one. For STORE_VERSION and
    /// UPDATE_CONFIRMED the reported identity is recorded as the "last
    /// version"; a rollback report with empty last-version fields picks that
    /// identity up, naming what was rolled back to.
    pub fn enqueue(&self, mut report: StatusReport) -> Result<StatusReport> {
        let mut conn = self.lock();
        db::transaction(&mut conn, |tx| {
            match report.status {
                ReportingStatus::StoreVersion | ReportingStatus::UpdateConfirmed => {
                    let label = report
                        .label
                        .clone()
                        .unwrap_or_else(|| report.app_version.clone());
                    models::set_flag(tx, models::FLAG_LAST_VERSION_LABEL, &label)?;
                    match &report.deployment_key {
                        Some(key) => {
                            models::set_flag(tx, models::FLAG_LAST_VERSION_DEPLOYMENT_KEY, key)?
                        }
                        None => {
                            models::delete_flag(tx, models::FLAG_LAST_VERSION_DEPLOYMENT_KEY)?
                        }
                    }
                }
                ReportingStatus::UpdateRolledBack => {
                    if report.last_version_label.is_none() {
                        report.last_version_label =
                            models::get_flag(tx, models::FLAG_LAST_VERSION_LABEL)?;
                    }
                    if report.last_version_deployment_key.is_none() {
                        report.last_version_deployment_key =
                            models::get_flag(tx, models::FLAG_LAST_VERSION_DEPLOYMENT_KEY)?;
                    }
                }
            }
            report.save(tx)?;
            Ok(())
        })?;
        debug!("Enqueued {} report", report.status.as_str());
        Ok(report)
    }

    /// Persist a report that a transport already failed to deliver
    pub fn save_failed_report(&self, report: &StatusReport) -> Result<()> {
        report.save(&self.lock())
    }

    pub fn has_failed_report(&self) -> Result<bool> {
        Ok(StatusReport::load(&self.lock())?.is_some())
    }

    pub fn get_failed_report(&self) -> Result<Option<StatusReport>> {
        StatusReport::load(&self.lock())
    }

    /// Atomically read and clear the pending report
    ///
    /// No two calls can both observe and clear the same report.
    pub fn get_and_clear_failed_report(&self) -> Result<Option<StatusReport>> {
        let mut conn = self.lock();
        db::transaction(&mut conn, |tx| {
            let report = StatusReport::load(tx)?;
            if report.is_some() {
                StatusReport::clear(tx)?;
            }
            Ok(report)
        })
    }

    /// Hand a report to the telemetry transport
    ///
    /// On success the report is discarded; on transport failure it is
    /// retained as the pending report for retry at the next launch, so it
    /// is never silently lost.
    pub fn report_status(&self, report: StatusReport, sink: &dyn TelemetrySink) -> Result<()> {
        let report = self.enqueue(report)?;
        match sink.send(&report) {
            Ok(()) => {
                info!("Delivered {} report", report.status.as_str());
                StatusReport::clear(&self.lock())?;
            }
            Err(e) => {
                warn!(
                    "Telemetry transport failed, retaining {} report: {}",
                    report.status.as_str(),
                    e
                );
            }
        }
        Ok(())
    }

    /// Retry the retained report from a previous launch, if any
    pub fn retry_failed_report(&self, sink: &dyn TelemetrySink) -> Result<()> {
        if let Some(report) = self.get_and_clear_failed_report()? {
            self.report_status(report, sink)?;
        }
        Ok(())
    }
}
