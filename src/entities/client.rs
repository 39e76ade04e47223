// 👤 Client Entity - the company (or person) that owns billing accounts
//
// Identity within one import run: normalized email, or a per-row synthetic key
// when the export has no email. Across runs a client is only ever reached
// through one of its BANs.

use serde::{Deserialize, Serialize};

/// Client fields as read from one spreadsheet row. Every field is optional;
/// blank cells arrive as None.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientDraft {
    pub owner_name: Option<String>,

    /// Company name. Falls back to "first last" during normalization.
    pub name: Option<String>,

    pub contact_person: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub additional_phone: Option<String>,
    pub cellular: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub zip_code: Option<String>,
}

impl ClientDraft {
    /// Dedup key for the run-scoped client map.
    ///
    /// `row` is the 1-based source row and only matters when email is absent:
    /// two email-less rows never share a client.
    pub fn dedup_key(&self, row: usize) -> String {
        match &self.email {
            Some(email) => email.trim().to_lowercase(),
            None => format!("sin-email-{}", row),
        }
    }

    /// Name stored in the clients table. A client always has a name.
    pub fn display_name(&self, ban_number: &str) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("Cliente BAN {}", ban_number),
        }
    }
}

/// A persisted client row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientRecord {
    pub id: i64,
    pub name: String,
    pub email: Option<String>,
}
