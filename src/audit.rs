// 🔎 Audit Differ - spreadsheet lines vs. the remote system of record
//
// Rows are matched to remote records by the last 10 digits of the phone,
// so country-code prefixes don't matter. Classification is pure: same rows
// + same snapshot → same result.

use crate::normalizer::normalize_date;
use crate::reader::{parse_loose_number, CellGrid};
use crate::schema::{AliasTable, AuditField, ColumnMapping};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Rows whose phone has fewer digits than this are not subscriber lines.
const MIN_PHONE_DIGITS: usize = 8;

// ============================================================================
// PHONE KEY
// ============================================================================

/// Digits only, last 10 kept.
pub fn phone_key(phone: &str) -> String {
    let digits: Vec<char> = phone.chars().filter(|c| c.is_ascii_digit()).collect();
    let start = digits.len().saturating_sub(10);
    digits[start..].iter().collect()
}

fn digit_count(phone: &str) -> usize {
    phone.chars().filter(|c| c.is_ascii_digit()).count()
}

// ============================================================================
// AUDIT ROW / REMOTE RECORD
// ============================================================================

/// One spreadsheet line of a legacy line-level export.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditRow {
    /// 1-based row in the source file
    pub row: usize,
    pub phone: String,
    pub ban: Option<String>,
    pub plan: Option<String>,
    pub activation_date: Option<String>,
    pub imsi: Option<String>,
    pub imei: Option<String>,
    pub product_type: Option<String>,
    pub name: Option<String>,
    pub voice_code: Option<String>,
    pub value: Option<String>,
}

impl AuditRow {
    pub fn get(&self, field: AuditField) -> Option<&str> {
        match field {
            AuditField::Phone => Some(self.phone.as_str()),
            AuditField::Ban => self.ban.as_deref(),
            AuditField::Plan => self.plan.as_deref(),
            AuditField::ActivationDate => self.activation_date.as_deref(),
            AuditField::Imsi => self.imsi.as_deref(),
            AuditField::Imei => self.imei.as_deref(),
            AuditField::ProductType => self.product_type.as_deref(),
            AuditField::Name => self.name.as_deref(),
            AuditField::VoiceCode => self.voice_code.as_deref(),
            AuditField::Value => self.value.as_deref(),
        }
    }
}

/// One line as the remote system of record knows it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    /// Row identity in the remote store; None for records not stored yet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub phone: String,
    pub ban: Option<String>,
    pub price_code: Option<String>,
    pub activation_date: Option<String>,
    pub imsi: Option<String>,
    pub imei: Option<String>,
    pub product_type: Option<String>,
    pub name: Option<String>,
    pub voice_code: Option<String>,
    pub value: Option<String>,
}

impl RemoteRecord {
    pub fn get(&self, field: AuditField) -> Option<&str> {
        match field {
            AuditField::Phone => Some(self.phone.as_str()),
            AuditField::Ban => self.ban.as_deref(),
            AuditField::Plan => self.price_code.as_deref(),
            AuditField::ActivationDate => self.activation_date.as_deref(),
            AuditField::Imsi => self.imsi.as_deref(),
            AuditField::Imei => self.imei.as_deref(),
            AuditField::ProductType => self.product_type.as_deref(),
            AuditField::Name => self.name.as_deref(),
            AuditField::VoiceCode => self.voice_code.as_deref(),
            AuditField::Value => self.value.as_deref(),
        }
    }
}

impl From<&AuditRow> for RemoteRecord {
    /// Full record for a line the remote system doesn't have yet.
    fn from(row: &AuditRow) -> Self {
        RemoteRecord {
            id: None,
            phone: row.phone.clone(),
            ban: row.ban.clone(),
            price_code: row.plan.clone(),
            activation_date: row
                .activation_date
                .as_deref()
                .map(|d| normalize_date(d).unwrap_or_else(|| d.to_string())),
            imsi: row.imsi.clone(),
            imei: row.imei.clone(),
            product_type: row.product_type.clone(),
            name: row.name.clone(),
            voice_code: row.voice_code.clone(),
            value: row.value.clone(),
        }
    }
}

// ============================================================================
// EXTRACTION
// ============================================================================

/// Map the grid with the audit alias table and keep rows with a real phone.
pub fn extract_audit_rows(grid: &CellGrid, aliases: &AliasTable<AuditField>) -> Vec<AuditRow> {
    let mapping = aliases.resolve_distinct(&grid.headers());

    grid.data_rows()
        .filter_map(|(row, cells)| {
            let text = |field: AuditField| cell_text(&mapping, cells, field);

            let phone = text(AuditField::Phone)?;
            if digit_count(&phone) < MIN_PHONE_DIGITS {
                log::debug!("Row {} dropped: phone '{}' too short", row, phone);
                return None;
            }

            Some(AuditRow {
                row,
                phone,
                ban: text(AuditField::Ban),
                plan: text(AuditField::Plan),
                activation_date: text(AuditField::ActivationDate),
                imsi: text(AuditField::Imsi),
                imei: text(AuditField::Imei),
                product_type: text(AuditField::ProductType),
                name: text(AuditField::Name),
                voice_code: text(AuditField::VoiceCode),
                value: text(AuditField::Value),
            })
        })
        .collect()
}

fn cell_text(mapping: &ColumnMapping<AuditField>, cells: &[crate::reader::Cell], field: AuditField) -> Option<String> {
    let text = cells.get(mapping.column(field)?)?.as_text();
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

// ============================================================================
// CLASSIFICATION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditStatus {
    Match,
    Mismatch,
    MissingInRemote,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDiff {
    pub field: AuditField,
    pub remote: String,
    pub local: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedRow {
    pub row: AuditRow,
    pub status: AuditStatus,

    /// Remote record the row was compared with. Corrections go to this
    /// record only, even when other records share the phone key.
    pub remote_id: Option<i64>,

    /// Only the differing fields, in comparison order. Empty unless Mismatch.
    pub diffs: Vec<FieldDiff>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditSummary {
    pub total: usize,
    pub matching: usize,
    pub mismatch: usize,
    pub missing: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditReport {
    pub summary: AuditSummary,
    pub rows: Vec<ClassifiedRow>,
}

impl AuditReport {
    /// Rows the sync applier has to correct.
    pub fn needs_sync(&self) -> impl Iterator<Item = &ClassifiedRow> {
        self.rows.iter().filter(|r| r.status != AuditStatus::Match)
    }
}

/// Remote records indexed by phone key. The first record per key wins.
#[derive(Debug, Clone, Default)]
pub struct RemoteSnapshot {
    by_phone: HashMap<String, RemoteRecord>,
}

impl RemoteSnapshot {
    pub fn new(records: Vec<RemoteRecord>) -> Self {
        let mut by_phone = HashMap::new();
        for record in records {
            by_phone.entry(phone_key(&record.phone)).or_insert(record);
        }
        RemoteSnapshot { by_phone }
    }

    pub fn get(&self, phone: &str) -> Option<&RemoteRecord> {
        self.by_phone.get(&phone_key(phone))
    }

    pub fn len(&self) -> usize {
        self.by_phone.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_phone.is_empty()
    }
}

/// Comparable form of a field value.
fn comparable(field: AuditField, value: &str) -> String {
    let value = value.trim();
    match field {
        AuditField::Phone => phone_key(value),
        AuditField::ActivationDate => normalize_date(value).unwrap_or_else(|| value.to_string()),
        AuditField::Value => parse_loose_number(value)
            .map(|n| format!("{:.2}", n))
            .unwrap_or_else(|| value.to_string()),
        _ => value.to_string(),
    }
}

/// Field-level diff of one row against its remote record. Blank spreadsheet
/// fields are not compared.
pub fn diff_fields(row: &AuditRow, remote: &RemoteRecord) -> Vec<FieldDiff> {
    AuditField::ALL
        .iter()
        .filter_map(|&field| {
            let local = row.get(field).filter(|v| !v.trim().is_empty())?;
            let local = comparable(field, local);
            let remote = comparable(field, remote.get(field).unwrap_or(""));

            if local == remote {
                None
            } else {
                Some(FieldDiff { field, remote, local })
            }
        })
        .collect()
}

pub fn classify(row: AuditRow, snapshot: &RemoteSnapshot) -> ClassifiedRow {
    match snapshot.get(&row.phone) {
        None => ClassifiedRow {
            row,
            status: AuditStatus::MissingInRemote,
            remote_id: None,
            diffs: Vec::new(),
        },
        Some(remote) => {
            let diffs = diff_fields(&row, remote);
            let status = if diffs.is_empty() {
                AuditStatus::Match
            } else {
                AuditStatus::Mismatch
            };
            ClassifiedRow {
                row,
                status,
                remote_id: remote.id,
                diffs,
            }
        }
    }
}

/// Classify every row and tally the outcome.
pub fn diff(rows: Vec<AuditRow>, snapshot: &RemoteSnapshot) -> AuditReport {
    let rows: Vec<ClassifiedRow> = rows.into_iter().map(|r| classify(r, snapshot)).collect();

    let summary = rows.iter().fold(AuditSummary::default(), |mut s, r| {
        s.total += 1;
        match r.status {
            AuditStatus::Match => s.matching += 1,
            AuditStatus::Mismatch => s.mismatch += 1,
            AuditStatus::MissingInRemote => s.missing += 1,
        }
        s
    });

    log::info!(
        "Audit: {} rows, {} match, {} mismatch, {} missing in remote",
        summary.total,
        summary.matching,
        summary.mismatch,
        summary.missing
    );

    AuditReport { summary, rows }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn audit_row(phone: &str, plan: &str) -> AuditRow {
        AuditRow {
            row: 2,
            phone: phone.to_string(),
            plan: Some(plan.to_string()),
            ..Default::default()
        }
    }

    fn remote(phone: &str, price_code: &str) -> RemoteRecord {
        RemoteRecord {
            phone: phone.to_string(),
            price_code: Some(price_code.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_scenario_d_plan_mismatch() {
        let snapshot = RemoteSnapshot::new(vec![remote("7875551111", "VOLT999")]);
        let report = diff(vec![audit_row("7875551111", "VOLT412")], &snapshot);

        let row = &report.rows[0];
        assert_eq!(row.status, AuditStatus::Mismatch);
        assert_eq!(
            row.diffs,
            vec![FieldDiff {
                field: AuditField::Plan,
                remote: "VOLT999".to_string(),
                local: "VOLT412".to_string(),
            }]
        );

        let json = serde_json::to_value(&row.diffs[0]).unwrap();
        assert_eq!(json["field"], "plan");

        println!("✅ Scenario D: MISMATCH on plan");
    }

    #[test]
    fn test_scenario_e_missing_in_remote() {
        let snapshot = RemoteSnapshot::new(vec![remote("7875559999", "VOLT999")]);
        let report = diff(vec![audit_row("7875551111", "VOLT412")], &snapshot);

        assert_eq!(report.rows[0].status, AuditStatus::MissingInRemote);
        assert!(report.rows[0].diffs.is_empty());
        assert_eq!(report.summary, AuditSummary { total: 1, matching: 0, mismatch: 0, missing: 1 });
    }

    #[test]
    fn test_match_by_last_ten_digits() {
        let snapshot = RemoteSnapshot::new(vec![remote("17875551111", "VOLT412")]);
        let report = diff(vec![audit_row("(787) 555-1111", "VOLT412")], &snapshot);

        assert_eq!(report.rows[0].status, AuditStatus::Match);
        assert_eq!(report.summary.matching, 1);
    }

    #[test]
    fn test_dates_and_values_are_normalized() {
        let local = AuditRow {
            row: 2,
            phone: "7875551111".to_string(),
            activation_date: Some("01/05/2024".to_string()),
            value: Some("45.5".to_string()),
            ..Default::default()
        };
        let same = RemoteRecord {
            phone: "7875551111".to_string(),
            activation_date: Some("2024-01-05T00:00:00".to_string()),
            value: Some("$45.50".to_string()),
            ..Default::default()
        };
        assert!(diff_fields(&local, &same).is_empty());

        let later = RemoteRecord {
            activation_date: Some("2024-02-05".to_string()),
            ..same
        };
        let diffs = diff_fields(&local, &later);
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].field, AuditField::ActivationDate);
        assert_eq!(diffs[0].local, "2024-01-05");
        assert_eq!(diffs[0].remote, "2024-02-05");
    }

    #[test]
    fn test_blank_local_fields_are_not_compared() {
        let local = AuditRow {
            row: 2,
            phone: "7875551111".to_string(),
            ..Default::default()
        };
        let remote = RemoteRecord {
            phone: "7875551111".to_string(),
            imsi: Some("310150123456789".to_string()),
            name: Some("Acme".to_string()),
            ..Default::default()
        };

        assert!(diff_fields(&local, &remote).is_empty());
    }

    #[test]
    fn test_diff_order_follows_field_list() {
        let local = AuditRow {
            row: 2,
            phone: "7875551111".to_string(),
            ban: Some("B1".to_string()),
            plan: Some("VOLT412".to_string()),
            imsi: Some("1".to_string()),
            ..Default::default()
        };
        let remote = RemoteRecord {
            phone: "7875551111".to_string(),
            ban: Some("B2".to_string()),
            price_code: Some("VOLT999".to_string()),
            imsi: Some("2".to_string()),
            ..Default::default()
        };

        let fields: Vec<AuditField> = diff_fields(&local, &remote).iter().map(|d| d.field).collect();
        assert_eq!(fields, vec![AuditField::Ban, AuditField::Imsi, AuditField::Plan]);
    }

    #[test]
    fn test_first_remote_record_per_phone_wins() {
        let snapshot = RemoteSnapshot::new(vec![remote("7875551111", "FIRST"), remote("17875551111", "SECOND")]);

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.get("7875551111").unwrap().price_code.as_deref(), Some("FIRST"));
    }

    #[test]
    fn test_diff_is_deterministic() {
        let snapshot = RemoteSnapshot::new(vec![remote("7875551111", "VOLT999"), remote("7875552222", "X")]);
        let rows = vec![
            audit_row("7875551111", "VOLT412"),
            audit_row("7875552222", "X"),
            audit_row("7875553333", "Y"),
        ];

        assert_eq!(diff(rows.clone(), &snapshot), diff(rows, &snapshot));
    }

    #[test]
    fn test_extract_rows_skips_short_phones_and_title_rows() {
        let grid = CellGrid::from_strings(&[
            &["Reporte de lineas", "", ""],
            &["ACCT_NO", "SUBSCRIBER_NO", "PRICE_CODE"],
            &["B1", "7875551111", "VOLT412"],
            &["B1", "1234", "VOLT412"],
            &["B1", "", "VOLT412"],
            &["B2", "787-555-2222", ""],
        ]);

        let rows = extract_audit_rows(&grid, &AliasTable::audit_defaults());

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].row, 3);
        assert_eq!(rows[0].ban.as_deref(), Some("B1"));
        assert_eq!(rows[0].plan.as_deref(), Some("VOLT412"));
        assert_eq!(rows[1].phone, "787-555-2222");
        assert_eq!(rows[1].plan, None);
    }

    fn legacy_grid() -> CellGrid {
        CellGrid::from_strings(&[
            &["ACCT_NO", "SUBSCRIBER_NO", "PRICE_CODE", "INIT_ACTIVATION_DATE"],
            &["B1", "7875551111", "VOLT412", "01/05/2024"],
            &["B1", "7875552222", "VOLT100", "2024-02-01"],
            &["B2", "7875553333", "VOLT200", ""],
        ])
    }

    fn legacy_snapshot() -> RemoteSnapshot {
        RemoteSnapshot::new(vec![
            RemoteRecord {
                id: Some(1),
                phone: "7875551111".to_string(),
                ban: Some("B1".to_string()),
                price_code: Some("VOLT999".to_string()),
                activation_date: Some("2024-01-05".to_string()),
                value: Some("45.00".to_string()),
                ..Default::default()
            },
            RemoteRecord {
                id: Some(2),
                phone: "17875552222".to_string(),
                ban: Some("B1".to_string()),
                price_code: Some("VOLT100".to_string()),
                activation_date: Some("2024-02-01T00:00:00".to_string()),
                value: Some("30.00".to_string()),
                ..Default::default()
            },
        ])
    }

    #[test]
    fn test_legacy_export_scenarios_from_grid() {
        let rows = extract_audit_rows(&legacy_grid(), &AliasTable::audit_defaults());
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.value.is_none()), "PRICE_CODE must not be read as value");

        let report = diff(rows, &legacy_snapshot());
        assert_eq!(report.summary, AuditSummary { total: 3, matching: 1, mismatch: 1, missing: 1 });

        // Scenario D: only the plan differs
        let mismatch = &report.rows[0];
        assert_eq!(mismatch.status, AuditStatus::Mismatch);
        assert_eq!(mismatch.remote_id, Some(1));
        assert_eq!(
            mismatch.diffs,
            vec![FieldDiff {
                field: AuditField::Plan,
                remote: "VOLT999".to_string(),
                local: "VOLT412".to_string(),
            }]
        );

        // Identical line (different phone prefix, datetime date) matches
        assert_eq!(report.rows[1].status, AuditStatus::Match);
        assert!(report.rows[1].diffs.is_empty());

        // Scenario E
        assert_eq!(report.rows[2].status, AuditStatus::MissingInRemote);
        assert_eq!(report.rows[2].remote_id, None);

        println!("✅ Legacy export: 1 match, 1 plan mismatch, 1 missing");
    }

    #[test]
    fn test_phone_key() {
        assert_eq!(phone_key("+1 (787) 555-1111"), "7875551111");
        assert_eq!(phone_key("5551234"), "5551234");
        assert_eq!(phone_key(""), "");
    }
}
