// 📤 Structure Export - resolved rows → clientes / bans / suscriptores / omitidos CSVs
//
// Works on resolver output only (synthetic CLIENT_n / BAN_n / SUB_n ids), so a
// spreadsheet can be reviewed before anything touches the store.

use crate::deduplication::ResolvedRow;
use crate::import::OmittedRow;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

// ============================================================================
// PLANNED ROWS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedClient {
    pub id: String,
    pub owner_name: Option<String>,
    pub name: String,
    pub contact_person: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub additional_phone: Option<String>,
    pub cellular: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub zip_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedBan {
    pub id: String,
    pub ban_number: String,
    pub client_id: String,
    pub account_type: Option<String>,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedSubscriber {
    pub id: String,
    pub ban_id: String,
    pub phone: String,
    pub plan: Option<String>,
    pub monthly_value: f64,
    pub remaining_payments: i64,
    pub contract_term: i64,
    pub contract_end_date: Option<String>,
}

/// The client/BAN/subscriber structure one spreadsheet would produce.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructurePlan {
    pub clients: Vec<PlannedClient>,
    pub bans: Vec<PlannedBan>,
    pub subscribers: Vec<PlannedSubscriber>,
    pub omitted: Vec<OmittedRow>,
}

impl StructurePlan {
    pub fn from_resolved(rows: &[ResolvedRow]) -> Self {
        let mut plan = StructurePlan::default();

        for resolved in rows {
            let parsed = &resolved.parsed;
            let accepted = match (&resolved.ids, parsed.ban_number(), parsed.phone()) {
                (Some(ids), Some(ban), Some(phone)) if !resolved.is_skipped() => Some((ids, ban, phone)),
                _ => None,
            };

            let Some((ids, ban_number, phone)) = accepted else {
                plan.omitted.push(OmittedRow::from(resolved));
                continue;
            };

            if ids.new_client {
                let client = &parsed.client;
                plan.clients.push(PlannedClient {
                    id: ids.client_id.clone(),
                    owner_name: client.owner_name.clone(),
                    name: client.display_name(ban_number),
                    contact_person: client.contact_person.clone(),
                    email: client.email.clone(),
                    phone: client.phone.clone(),
                    additional_phone: client.additional_phone.clone(),
                    cellular: client.cellular.clone(),
                    address: client.address.clone(),
                    city: client.city.clone(),
                    zip_code: client.zip_code.clone(),
                });
            }

            if ids.new_ban {
                plan.bans.push(PlannedBan {
                    id: ids.ban_id.clone(),
                    ban_number: ban_number.to_string(),
                    client_id: ids.client_id.clone(),
                    account_type: parsed.ban.account_type.clone(),
                    status: parsed.ban.status.as_str().to_string(),
                });
            }

            let sub = &parsed.subscriber;
            plan.subscribers.push(PlannedSubscriber {
                id: ids.subscriber_id.clone(),
                ban_id: ids.ban_id.clone(),
                phone: phone.to_string(),
                plan: sub.plan.clone(),
                monthly_value: sub.monthly_value,
                remaining_payments: sub.remaining_payments,
                contract_term: sub.contract_term,
                contract_end_date: sub.contract_end_date.clone(),
            });
        }

        plan
    }

    /// Write the four CSV files into `dir` (created if needed). Returns the
    /// paths written.
    pub fn write_csv_dir(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory: {}", dir.display()))?;

        let files = vec![
            write_csv(&dir.join("clientes.csv"), &self.clients)?,
            write_csv(&dir.join("bans.csv"), &self.bans)?,
            write_csv(&dir.join("suscriptores.csv"), &self.subscribers)?,
            write_csv(&dir.join("omitidos.csv"), &self.omitted)?,
        ];

        log::info!(
            "Structure written to {}: {} clients, {} BANs, {} subscribers, {} omitted",
            dir.display(),
            self.clients.len(),
            self.bans.len(),
            self.subscribers.len(),
            self.omitted.len()
        );

        Ok(files)
    }
}

/// Serialize records to a CSV file with a header row.
pub fn write_csv<T: Serialize>(path: &Path, records: &[T]) -> Result<PathBuf> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create file: {}", path.display()))?;

    for record in records {
        writer
            .serialize(record)
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }
    writer.flush()?;

    Ok(path.to_path_buf())
}

// ============================================================================
// TESTS
// ============================================================================
