// 🔁 Sync Applier - push spreadsheet corrections to the remote system
//
// No all-or-nothing here: each row's write stands alone. A failed row is
// counted and reported, and the next row is attempted anyway.

use crate::audit::{phone_key, AuditReport, AuditStatus, ClassifiedRow, RemoteRecord};
use crate::cancel::CancelToken;
use crate::error::StoreError;
use crate::schema::AuditField;
use anyhow::Context;
use rusqlite::{params, Connection, ToSql};
use serde::{Deserialize, Serialize};
use std::path::Path;

// ============================================================================
// REMOTE STORE
// ============================================================================

/// One field to overwrite with the spreadsheet value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: AuditField,
    pub value: String,
}

/// The remote system of record, as far as audits are concerned.
pub trait RemoteStore {
    /// Every known line, with its record id.
    fn fetch_snapshot(&self) -> Result<Vec<RemoteRecord>, StoreError>;

    /// Patch one record. Returns how many were touched (0 or 1).
    fn update_fields(&mut self, id: i64, changes: &[FieldChange]) -> Result<usize, StoreError>;

    fn create(&mut self, record: &RemoteRecord) -> Result<(), StoreError>;
}

// ============================================================================
// SYNC REPORT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncFailure {
    pub phone: String,
    pub message: String,
}

/// `updated` counts every applied correction, creates included.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub total: usize,
    pub updated: usize,
    pub failed: usize,
    pub errors: Vec<SyncFailure>,
}

// ============================================================================
// APPLIER
// ============================================================================

/// Corrective changes for a mismatched row: the spreadsheet side of every diff.
pub fn changes_for(row: &ClassifiedRow) -> Vec<FieldChange> {
    row.diffs
        .iter()
        .map(|d| FieldChange {
            field: d.field,
            value: d.local.clone(),
        })
        .collect()
}

fn apply_row<R: RemoteStore>(remote: &mut R, row: &ClassifiedRow) -> Result<(), StoreError> {
    match row.status {
        AuditStatus::Match => Ok(()),
        AuditStatus::MissingInRemote => remote.create(&RemoteRecord::from(&row.row)),
        AuditStatus::Mismatch => {
            let id = row
                .remote_id
                .ok_or_else(|| StoreError::RemoteNotFound(row.row.phone.clone()))?;
            let touched = remote.update_fields(id, &changes_for(row))?;
            if touched == 0 {
                return Err(StoreError::RemoteNotFound(row.row.phone.clone()));
            }
            Ok(())
        }
    }
}

/// Apply every non-matching row of an audit. Rows are independent; the
/// cancellation token is checked between rows and stops the remaining ones.
pub fn apply<R: RemoteStore>(report: &AuditReport, remote: &mut R, cancel: &CancelToken) -> SyncReport {
    let candidates: Vec<&ClassifiedRow> = report.needs_sync().collect();
    let mut sync = SyncReport {
        total: candidates.len(),
        ..Default::default()
    };

    for row in candidates {
        if cancel.is_cancelled() {
            log::warn!(
                "Sync cancelled: {} of {} rows not attempted",
                sync.total - sync.updated - sync.failed,
                sync.total
            );
            break;
        }

        match apply_row(remote, row) {
            Ok(()) => sync.updated += 1,
            Err(e) => {
                log::warn!("Sync failed for {}: {}", row.row.phone, e);
                sync.failed += 1;
                sync.errors.push(SyncFailure {
                    phone: row.row.phone.clone(),
                    message: e.to_string(),
                });
            }
        }
    }

    log::info!("Sync: {} updated, {} failed", sync.updated, sync.failed);
    sync
}

// ============================================================================
// SQLITE REMOTE STORE
// ============================================================================

fn column(field: AuditField) -> &'static str {
    match field {
        AuditField::Phone => "phone",
        AuditField::Ban => "ban",
        AuditField::Plan => "price_code",
        AuditField::ActivationDate => "activation_date",
        AuditField::Imsi => "imsi",
        AuditField::Imei => "imei",
        AuditField::ProductType => "product_type",
        AuditField::Name => "name",
        AuditField::VoiceCode => "voice_code",
        AuditField::Value => "value",
    }
}

pub fn setup_remote_database(conn: &Connection) -> anyhow::Result<()> {
    conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS remote_lines (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            phone TEXT NOT NULL,
            phone_key TEXT NOT NULL,
            ban TEXT,
            price_code TEXT,
            activation_date TEXT,
            imsi TEXT,
            imei TEXT,
            product_type TEXT,
            name TEXT,
            voice_code TEXT,
            value TEXT,
            updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_remote_phone_key ON remote_lines(phone_key)",
        [],
    )?;

    Ok(())
}

/// Remote system of record kept in its own SQLite database.
pub struct SqliteRemoteStore {
    conn: Connection,
}

impl SqliteRemoteStore {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open remote database: {}", path.display()))?;
        setup_remote_database(&conn)?;
        Ok(SqliteRemoteStore { conn })
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        setup_remote_database(&conn)?;
        Ok(SqliteRemoteStore { conn })
    }
}

impl RemoteStore for SqliteRemoteStore {
    fn fetch_snapshot(&self) -> Result<Vec<RemoteRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, phone, ban, price_code, activation_date, imsi, imei,
                    product_type, name, voice_code, value
             FROM remote_lines
             ORDER BY id",
        )?;

        let records = stmt
            .query_map([], |row| {
                Ok(RemoteRecord {
                    id: Some(row.get(0)?),
                    phone: row.get(1)?,
                    ban: row.get(2)?,
                    price_code: row.get(3)?,
                    activation_date: row.get(4)?,
                    imsi: row.get(5)?,
                    imei: row.get(6)?,
                    product_type: row.get(7)?,
                    name: row.get(8)?,
                    voice_code: row.get(9)?,
                    value: row.get(10)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(records)
    }

    fn update_fields(&mut self, id: i64, changes: &[FieldChange]) -> Result<usize, StoreError> {
        if changes.is_empty() {
            return Ok(0);
        }

        // Column names come from a fixed table, only values are bound
        let assignments: Vec<String> = changes
            .iter()
            .enumerate()
            .map(|(i, change)| format!("{} = ?{}", column(change.field), i + 1))
            .collect();
        let sql = format!(
            "UPDATE remote_lines SET {}, updated_at = CURRENT_TIMESTAMP WHERE id = ?{}",
            assignments.join(", "),
            changes.len() + 1
        );

        let mut values: Vec<&dyn ToSql> = changes.iter().map(|c| &c.value as &dyn ToSql).collect();
        values.push(&id);

        Ok(self.conn.execute(&sql, values.as_slice())?)
    }

    fn create(&mut self, record: &RemoteRecord) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO remote_lines (
                phone, phone_key, ban, price_code, activation_date, imsi, imei,
                product_type, name, voice_code, value
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                record.phone,
                phone_key(&record.phone),
                record.ban,
                record.price_code,
                record.activation_date,
                record.imsi,
                record.imei,
                record.product_type,
                record.name,
                record.voice_code,
                record.value,
            ],
        )?;

        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{diff, extract_audit_rows, AuditRow, AuditSummary, RemoteSnapshot};
    use crate::reader::CellGrid;
    use crate::schema::AliasTable;

    fn remote_line(phone: &str, price_code: &str) -> RemoteRecord {
        RemoteRecord {
            phone: phone.to_string(),
            price_code: Some(price_code.to_string()),
            ban: Some("B1".to_string()),
            ..Default::default()
        }
    }

    fn audit_row(row: usize, phone: &str, plan: &str) -> AuditRow {
        AuditRow {
            row,
            phone: phone.to_string(),
            plan: Some(plan.to_string()),
            ban: Some("B1".to_string()),
            ..Default::default()
        }
    }

    /// Remote that rejects writes to one record.
    struct RejectingRemote {
        inner: SqliteRemoteStore,
        reject_id: i64,
    }

    impl RemoteStore for RejectingRemote {
        fn fetch_snapshot(&self) -> Result<Vec<RemoteRecord>, StoreError> {
            self.inner.fetch_snapshot()
        }

        fn update_fields(&mut self, id: i64, changes: &[FieldChange]) -> Result<usize, StoreError> {
            if id == self.reject_id {
                return Err(StoreError::Sqlite(rusqlite::Error::InvalidQuery));
            }
            self.inner.update_fields(id, changes)
        }

        fn create(&mut self, record: &RemoteRecord) -> Result<(), StoreError> {
            self.inner.create(record)
        }
    }

    #[test]
    fn test_mismatch_is_patched_and_missing_is_created() {
        let mut remote = SqliteRemoteStore::open_in_memory().unwrap();
        remote.create(&remote_line("7875551111", "VOLT999")).unwrap();
        remote.create(&remote_line("7875552222", "VOLT412")).unwrap();

        let snapshot = RemoteSnapshot::new(remote.fetch_snapshot().unwrap());
        let report = diff(
            vec![
                audit_row(2, "7875551111", "VOLT412"),
                audit_row(3, "7875552222", "VOLT412"),
                audit_row(4, "7875553333", "VOLT100"),
            ],
            &snapshot,
        );

        let sync = apply(&report, &mut remote, &CancelToken::new());

        assert_eq!(sync, SyncReport { total: 2, updated: 2, failed: 0, errors: vec![] });

        // A second audit against the patched remote is clean
        let snapshot = RemoteSnapshot::new(remote.fetch_snapshot().unwrap());
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot.get("7875551111").unwrap().price_code.as_deref(), Some("VOLT412"));

        let again = diff(
            vec![
                audit_row(2, "7875551111", "VOLT412"),
                audit_row(3, "7875552222", "VOLT412"),
                audit_row(4, "7875553333", "VOLT100"),
            ],
            &snapshot,
        );
        assert_eq!(again.summary.matching, 3);

        println!("✅ Sync: 1 patched, 1 created, re-audit clean");
    }

    #[test]
    fn test_failed_row_does_not_block_others() {
        let mut inner = SqliteRemoteStore::open_in_memory().unwrap();
        inner.create(&remote_line("7875551111", "OLD")).unwrap();
        inner.create(&remote_line("7875552222", "OLD")).unwrap();

        let snapshot = RemoteSnapshot::new(inner.fetch_snapshot().unwrap());
        let report = diff(
            vec![
                audit_row(2, "7875551111", "NEW"),
                audit_row(3, "7875552222", "NEW"),
            ],
            &snapshot,
        );

        let mut remote = RejectingRemote {
            inner,
            reject_id: 1,
        };
        let sync = apply(&report, &mut remote, &CancelToken::new());

        assert_eq!(sync.total, 2);
        assert_eq!(sync.updated, 1);
        assert_eq!(sync.failed, 1);
        assert_eq!(sync.errors[0].phone, "7875551111");

        let after = RemoteSnapshot::new(remote.fetch_snapshot().unwrap());
        assert_eq!(after.get("7875552222").unwrap().price_code.as_deref(), Some("NEW"));
        assert_eq!(after.get("7875551111").unwrap().price_code.as_deref(), Some("OLD"));
    }

    #[test]
    fn test_update_of_vanished_record_counts_as_failed() {
        let mut remote = SqliteRemoteStore::open_in_memory().unwrap();
        remote.create(&remote_line("7875551111", "OLD")).unwrap();
        let snapshot = RemoteSnapshot::new(remote.fetch_snapshot().unwrap());
        let report = diff(vec![audit_row(2, "7875551111", "NEW")], &snapshot);

        // The line disappears between snapshot and sync
        let mut empty = SqliteRemoteStore::open_in_memory().unwrap();
        let sync = apply(&report, &mut empty, &CancelToken::new());

        assert_eq!(sync.failed, 1);
        assert_eq!(sync.errors[0].message, "no remote record for phone 7875551111");
    }

    #[test]
    fn test_cancel_stops_remaining_rows() {
        let mut remote = SqliteRemoteStore::open_in_memory().unwrap();
        let report = diff(
            vec![audit_row(2, "7875551111", "A"), audit_row(3, "7875552222", "B")],
            &RemoteSnapshot::default(),
        );

        let cancel = CancelToken::new();
        cancel.cancel();
        let sync = apply(&report, &mut remote, &cancel);

        assert_eq!(sync.total, 2);
        assert_eq!(sync.updated + sync.failed, 0);
        assert!(remote.fetch_snapshot().unwrap().is_empty());
    }

    #[test]
    fn test_patch_touches_only_the_compared_record() {
        let mut remote = SqliteRemoteStore::open_in_memory().unwrap();
        remote.create(&remote_line("7875551111", "OLD")).unwrap();
        remote
            .create(&RemoteRecord {
                ban: Some("B9".to_string()),
                ..remote_line("17875551111", "OTHER")
            })
            .unwrap();

        // Both records share the phone key; the first one is compared
        let snapshot = RemoteSnapshot::new(remote.fetch_snapshot().unwrap());
        let report = diff(vec![audit_row(2, "7875551111", "NEW")], &snapshot);
        assert_eq!(report.rows[0].remote_id, Some(1));

        let sync = apply(&report, &mut remote, &CancelToken::new());
        assert_eq!(sync.updated, 1);

        let lines: Vec<(Option<String>, Option<String>)> = remote
            .fetch_snapshot()
            .unwrap()
            .into_iter()
            .map(|r| (r.ban, r.price_code))
            .collect();
        assert_eq!(
            lines,
            vec![
                (Some("B1".to_string()), Some("NEW".to_string())),
                (Some("B9".to_string()), Some("OTHER".to_string())),
            ]
        );

        println!("✅ Sync: only the audited record was rewritten");
    }

    #[test]
    fn test_legacy_export_audit_and_sync_end_to_end() {
        let mut remote = SqliteRemoteStore::open_in_memory().unwrap();
        remote
            .create(&RemoteRecord {
                value: Some("45.00".to_string()),
                ..remote_line("7875551111", "VOLT999")
            })
            .unwrap();
        remote
            .create(&RemoteRecord {
                value: Some("30.00".to_string()),
                ..remote_line("7875552222", "VOLT100")
            })
            .unwrap();

        let grid = CellGrid::from_strings(&[
            &["ACCT_NO", "SUBSCRIBER_NO", "PRICE_CODE"],
            &["B1", "7875551111", "VOLT412"],
            &["B1", "7875552222", "VOLT100"],
            &["B2", "7875553333", "VOLT200"],
        ]);
        let aliases = AliasTable::audit_defaults();

        let snapshot = RemoteSnapshot::new(remote.fetch_snapshot().unwrap());
        let report = diff(extract_audit_rows(&grid, &aliases), &snapshot);
        assert_eq!(report.summary, AuditSummary { total: 3, matching: 1, mismatch: 1, missing: 1 });
        assert_eq!(report.rows[0].diffs.len(), 1);
        assert_eq!(report.rows[0].diffs[0].field, AuditField::Plan);

        let sync = apply(&report, &mut remote, &CancelToken::new());
        assert_eq!(sync, SyncReport { total: 2, updated: 2, failed: 0, errors: vec![] });

        // Value untouched, plan corrected, missing line created
        let after = RemoteSnapshot::new(remote.fetch_snapshot().unwrap());
        let patched = after.get("7875551111").unwrap();
        assert_eq!(patched.price_code.as_deref(), Some("VOLT412"));
        assert_eq!(patched.value.as_deref(), Some("45.00"));
        assert_eq!(after.get("7875553333").unwrap().ban.as_deref(), Some("B2"));

        let again = diff(extract_audit_rows(&grid, &aliases), &after);
        assert_eq!(again.summary.matching, 3);

        println!("✅ Legacy export: audit, sync and clean re-audit");
    }

    #[test]
    fn test_changes_use_spreadsheet_values() {
        let snapshot = RemoteSnapshot::new(vec![remote_line("7875551111", "VOLT999")]);
        let report = diff(vec![audit_row(2, "7875551111", "VOLT412")], &snapshot);

        assert_eq!(
            changes_for(&report.rows[0]),
            vec![FieldChange { field: AuditField::Plan, value: "VOLT412".to_string() }]
        );
    }
}
