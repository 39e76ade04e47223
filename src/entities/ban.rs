// 🧾 BAN Entity - Billing Account Number
//
// The BAN number is the cross-run natural key. It is compared exactly as
// typed in the spreadsheet: no case folding, no leading-zero stripping.
// A BAN's client never changes once created.

use serde::{Deserialize, Serialize};

// ============================================================================
// BAN STATUS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BanStatus {
    /// 'A'
    #[default]
    Active,

    /// 'C'
    Cancelled,
}

impl BanStatus {
    /// Any value other than A or C becomes Active.
    pub fn coerce(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_uppercase()).as_deref() {
            Some("C") => BanStatus::Cancelled,
            _ => BanStatus::Active,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BanStatus::Active => "A",
            BanStatus::Cancelled => "C",
        }
    }
}

// ============================================================================
// DRAFT / RECORD
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BanDraft {
    pub ban_number: Option<String>,
    pub account_type: Option<String>,
    pub status: BanStatus,
}

/// A persisted BAN row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BanRecord {
    pub id: i64,
    pub ban_number: String,
    pub client_id: i64,
    pub account_type: Option<String>,
    pub status: BanStatus,
}
