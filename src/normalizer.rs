// 🧹 Row Normalizer - one data row → Client / Ban / Subscriber drafts
//
// Blank cells become None (or 0 for numeric fields), never an error.
// Every string is trimmed. The literal text "NULL" counts as blank since
// the upstream system writes it for missing values.

use crate::entities::{BanDraft, BanStatus, ClientDraft, SubscriberDraft};
use crate::reader::Cell;
use crate::schema::{CanonicalField, ColumnMapping};
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

// ============================================================================
// PARSED ROW
// ============================================================================

/// The three partial records one spreadsheet row describes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedRow {
    /// 1-based row number in the source file
    pub row: usize,
    pub client: ClientDraft,
    pub ban: BanDraft,
    pub subscriber: SubscriberDraft,
}

impl ParsedRow {
    pub fn ban_number(&self) -> Option<&str> {
        self.ban.ban_number.as_deref()
    }

    pub fn phone(&self) -> Option<&str> {
        self.subscriber.phone.as_deref()
    }
}

/// True when every cell of the row is blank.
pub fn is_empty_row(cells: &[Cell]) -> bool {
    cells.iter().all(Cell::is_blank)
}

// ============================================================================
// NORMALIZER
// ============================================================================

pub struct RowNormalizer {
    mapping: ColumnMapping<CanonicalField>,

    /// Columns headed exactly "NOMBRE" / "APELLIDO", used when the company
    /// name is blank.
    first_name_column: Option<usize>,
    last_name_column: Option<usize>,

    /// Month the remaining payments are counted from.
    reference_date: NaiveDate,
}

impl RowNormalizer {
    pub fn new(mapping: ColumnMapping<CanonicalField>, reference_date: NaiveDate) -> Self {
        let first_name_column = mapping.exact_header("NOMBRE");
        let last_name_column = mapping.exact_header("APELLIDO");

        RowNormalizer {
            mapping,
            first_name_column,
            last_name_column,
            reference_date,
        }
    }

    pub fn normalize(&self, row: usize, cells: &[Cell]) -> ParsedRow {
        use CanonicalField::*;

        let name = self
            .text(cells, Name)
            .or_else(|| self.full_name(cells));

        let client = ClientDraft {
            owner_name: self.text(cells, OwnerName),
            name,
            contact_person: self.text(cells, ContactPerson),
            email: self.text(cells, Email),
            phone: self.text(cells, Phone),
            additional_phone: self.text(cells, AdditionalPhone),
            cellular: self.text(cells, Cellular),
            address: self.text(cells, Address),
            city: self.text(cells, City),
            zip_code: self.text(cells, ZipCode),
        };

        let ban = BanDraft {
            ban_number: self.text(cells, BanNumber),
            account_type: self.text(cells, AccountType),
            status: BanStatus::coerce(self.text(cells, Status).as_deref()),
        };

        let mut subscriber = SubscriberDraft {
            phone: self.text(cells, SubscriberPhone),
            plan: self.text(cells, Plan),
            monthly_value: self.number(cells, MonthlyValue),
            remaining_payments: self.number(cells, RemainingPayments).trunc() as i64,
            contract_term: self.number(cells, ContractTerm).trunc() as i64,
            contract_end_date: self.date(cells, ContractEndDate),
        };
        subscriber.derive_contract_end(self.reference_date);

        ParsedRow {
            row,
            client,
            ban,
            subscriber,
        }
    }

    // ========================================================================
    // CELL ACCESS
    // ========================================================================

    fn cell<'a>(&self, cells: &'a [Cell], field: CanonicalField) -> Option<&'a Cell> {
        self.mapping.column(field).and_then(|col| cells.get(col))
    }

    fn text(&self, cells: &[Cell], field: CanonicalField) -> Option<String> {
        self.cell(cells, field).and_then(clean_text)
    }

    fn number(&self, cells: &[Cell], field: CanonicalField) -> f64 {
        self.cell(cells, field)
            .and_then(Cell::as_number)
            .unwrap_or(0.0)
    }

    fn date(&self, cells: &[Cell], field: CanonicalField) -> Option<String> {
        match self.cell(cells, field)? {
            Cell::Number(serial) => serial_to_date(*serial).map(|d| d.format("%Y-%m-%d").to_string()),
            cell => {
                let text = clean_text(cell)?;
                Some(normalize_date(&text).unwrap_or(text))
            }
        }
    }

    /// "NOMBRE APELLIDO", skipping whichever side is blank.
    fn full_name(&self, cells: &[Cell]) -> Option<String> {
        let part = |col: Option<usize>| col.and_then(|c| cells.get(c)).and_then(clean_text);

        let parts: Vec<String> = [part(self.first_name_column), part(self.last_name_column)]
            .into_iter()
            .flatten()
            .collect();

        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" "))
        }
    }
}

fn clean_text(cell: &Cell) -> Option<String> {
    let text = cell.as_text();
    let trimmed = text.trim();

    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("NULL") {
        None
    } else {
        Some(trimmed.to_string())
    }
}

// ============================================================================
// DATES
// ============================================================================

/// Spreadsheet serial day number → calendar date (1900 date system).
pub fn serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !(1.0..2_958_466.0).contains(&serial) {
        return None;
    }

    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    epoch.checked_add_signed(Duration::days(serial.trunc() as i64))
}

/// Normalize a date written in any of the upstream formats to `YYYY-MM-DD`.
///
/// Accepts `YYYY-MM-DD`, `YYYY/MM/DD`, `MM/DD/YYYY`, `MM/DD/YY`, an ISO
/// datetime (date part kept) and spreadsheet serial numbers.
pub fn normalize_date(text: &str) -> Option<String> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if text.chars().all(|c| c.is_ascii_digit() || c == '.') {
        let serial: f64 = text.parse().ok()?;
        return serial_to_date(serial).map(|d| d.format("%Y-%m-%d").to_string());
    }

    // Datetimes: keep the date part only
    let date_part = text
        .split(|c: char| c == 'T' || c == ' ')
        .next()
        .unwrap_or(text);

    // %Y would happily read "24" as year 24, so two-digit years get their own format
    let short_year = date_part.contains('/')
        && date_part.rsplit('/').next().map_or(false, |year| year.len() == 2);
    let formats: &[&str] = if short_year {
        &["%m/%d/%y"]
    } else {
        &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"]
    };

    formats
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(date_part, fmt).ok())
        .map(|d| d.format("%Y-%m-%d").to_string())
}

// ============================================================================
// TESTS
// ============================================================================
