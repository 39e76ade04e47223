// 🗺️ Schema Mapper - header labels → canonical field columns
//
// Alias tables are data: each canonical field owns an ordered list of header
// fragments. A header matches an alias when its upper-cased, trimmed text
// CONTAINS the alias, so "NOMBRE CLIENTE" matches "CLIENTE".
// First alias that matches anything wins; for that alias, the leftmost
// header wins. No fuzzy matching.
// Audit exports resolve with distinct columns: PRICE_CODE belongs to the plan
// and is not read again as the monthly value.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::Hash;

// ============================================================================
// CANONICAL FIELDS
// ============================================================================

/// Field identifiers usable as alias-table keys.
pub trait FieldName: Copy + Eq + Hash + std::fmt::Debug {
    fn name(&self) -> &'static str;
}

/// Canonical fields of the import path, grouped by the entity they feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalField {
    // Client
    OwnerName,
    Name,
    ContactPerson,
    Email,
    Phone,
    AdditionalPhone,
    Cellular,
    Address,
    City,
    ZipCode,
    // Ban
    BanNumber,
    AccountType,
    Status,
    // Subscriber
    SubscriberPhone,
    Plan,
    MonthlyValue,
    RemainingPayments,
    ContractTerm,
    ContractEndDate,
}

impl CanonicalField {
    pub const ALL: [CanonicalField; 19] = [
        CanonicalField::OwnerName,
        CanonicalField::Name,
        CanonicalField::ContactPerson,
        CanonicalField::Email,
        CanonicalField::Phone,
        CanonicalField::AdditionalPhone,
        CanonicalField::Cellular,
        CanonicalField::Address,
        CanonicalField::City,
        CanonicalField::ZipCode,
        CanonicalField::BanNumber,
        CanonicalField::AccountType,
        CanonicalField::Status,
        CanonicalField::SubscriberPhone,
        CanonicalField::Plan,
        CanonicalField::MonthlyValue,
        CanonicalField::RemainingPayments,
        CanonicalField::ContractTerm,
        CanonicalField::ContractEndDate,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|f| f.name() == name)
    }
}

impl FieldName for CanonicalField {
    fn name(&self) -> &'static str {
        match self {
            CanonicalField::OwnerName => "owner_name",
            CanonicalField::Name => "name",
            CanonicalField::ContactPerson => "contact_person",
            CanonicalField::Email => "email",
            CanonicalField::Phone => "phone",
            CanonicalField::AdditionalPhone => "additional_phone",
            CanonicalField::Cellular => "cellular",
            CanonicalField::Address => "address",
            CanonicalField::City => "city",
            CanonicalField::ZipCode => "zip_code",
            CanonicalField::BanNumber => "ban_number",
            CanonicalField::AccountType => "account_type",
            CanonicalField::Status => "status",
            CanonicalField::SubscriberPhone => "subscriber_phone",
            CanonicalField::Plan => "plan",
            CanonicalField::MonthlyValue => "monthly_value",
            CanonicalField::RemainingPayments => "remaining_payments",
            CanonicalField::ContractTerm => "contract_term",
            CanonicalField::ContractEndDate => "contract_end_date",
        }
    }
}

/// Fields of an audit row. The order of `ALL` is the comparison order used
/// by the audit differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditField {
    ActivationDate,
    Ban,
    Phone,
    Name,
    VoiceCode,
    Value,
    Imsi,
    Imei,
    ProductType,
    Plan,
}

impl AuditField {
    pub const ALL: [AuditField; 10] = [
        AuditField::ActivationDate,
        AuditField::Ban,
        AuditField::Phone,
        AuditField::Name,
        AuditField::VoiceCode,
        AuditField::Value,
        AuditField::Imsi,
        AuditField::Imei,
        AuditField::ProductType,
        AuditField::Plan,
    ];
}

impl FieldName for AuditField {
    fn name(&self) -> &'static str {
        match self {
            AuditField::ActivationDate => "activation_date",
            AuditField::Ban => "ban",
            AuditField::Phone => "phone",
            AuditField::Name => "name",
            AuditField::VoiceCode => "voice_code",
            AuditField::Value => "value",
            AuditField::Imsi => "imsi",
            AuditField::Imei => "imei",
            AuditField::ProductType => "product_type",
            AuditField::Plan => "plan",
        }
    }
}

// ============================================================================
// ALIAS TABLE
// ============================================================================

/// Ordered field → alias-list table. Aliases are stored upper-cased.
#[derive(Debug, Clone)]
pub struct AliasTable<F: FieldName> {
    entries: Vec<(F, Vec<String>)>,
}

impl<F: FieldName> AliasTable<F> {
    pub fn new() -> Self {
        AliasTable {
            entries: Vec::new(),
        }
    }

    /// Register a field with its aliases (or append to an existing one).
    pub fn with_field(mut self, field: F, aliases: &[&str]) -> Self {
        self.add_aliases(field, aliases.iter().map(|a| a.to_string()));
        self
    }

    /// Append aliases after the ones already registered for `field`.
    pub fn add_aliases<I>(&mut self, field: F, aliases: I)
    where
        I: IntoIterator<Item = String>,
    {
        let normalized = aliases.into_iter().map(|a| a.trim().to_uppercase());

        match self.entries.iter_mut().find(|(f, _)| *f == field) {
            Some((_, existing)) => {
                for alias in normalized {
                    if !existing.contains(&alias) {
                        existing.push(alias);
                    }
                }
            }
            None => self.entries.push((field, normalized.collect())),
        }
    }

    pub fn aliases(&self, field: F) -> &[String] {
        self.entries
            .iter()
            .find(|(f, _)| *f == field)
            .map(|(_, aliases)| aliases.as_slice())
            .unwrap_or(&[])
    }

    /// Resolve every field of the table against a header row.
    pub fn resolve(&self, headers: &[String]) -> ColumnMapping<F> {
        self.resolve_with(headers, false)
    }

    /// Like `resolve`, but a column already claimed by an earlier field is
    /// never handed to a later one.
    pub fn resolve_distinct(&self, headers: &[String]) -> ColumnMapping<F> {
        self.resolve_with(headers, true)
    }

    fn resolve_with(&self, headers: &[String], distinct: bool) -> ColumnMapping<F> {
        let normalized: Vec<String> = headers.iter().map(|h| h.trim().to_uppercase()).collect();

        let mut columns: HashMap<F, usize> = HashMap::new();
        for (field, aliases) in &self.entries {
            let claimed = |index: usize| distinct && columns.values().any(|&c| c == index);
            let found = aliases.iter().find_map(|alias| {
                normalized
                    .iter()
                    .enumerate()
                    .find(|(i, h)| !claimed(*i) && h.contains(alias.as_str()))
                    .map(|(i, _)| i)
            });

            match found {
                Some(index) => {
                    log::debug!(
                        "Column {} <- [{}] {}",
                        field.name(),
                        index,
                        headers[index]
                    );
                    columns.insert(*field, index);
                }
                None => log::debug!("Column {} not present", field.name()),
            }
        }

        ColumnMapping {
            columns,
            headers: headers.to_vec(),
        }
    }
}

impl<F: FieldName> Default for AliasTable<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl AliasTable<CanonicalField> {
    /// Built-in aliases for client/BAN/subscriber exports.
    pub fn import_defaults() -> Self {
        use CanonicalField::*;

        AliasTable::new()
            .with_field(OwnerName, &["PROPIETARIO", "DUEÑO", "OWNER", "PROPIETARIO EMPRESA"])
            .with_field(
                Name,
                &["NOMBRE EMPRESA", "EMPRESA", "RAZON SOCIAL", "CLIENTE", "NOMBRE CLIENTE", "COMPANY"],
            )
            .with_field(
                ContactPerson,
                &["CONTACTO", "PERSONA CONTACTO", "CONTACT PERSON", "NOMBRE CONTACTO", "NOMBRE", "APELLIDO"],
            )
            .with_field(Email, &["EMAIL", "CORREO", "E-MAIL", "MAIL"])
            .with_field(Phone, &["TELEFONO", "TEL", "PHONE", "TELEFONO EMPRESA"])
            .with_field(AdditionalPhone, &["TELEFONO ADICIONAL", "TEL2", "TELEFONO 2", "PHONE 2"])
            .with_field(Cellular, &["CELULAR", "MOVIL", "CEL", "CELLULAR", "MOBILE"])
            .with_field(Address, &["DIRECCION", "ADDRESS", "DIR"])
            .with_field(City, &["CIUDAD", "CITY", "MUNICIPIO"])
            .with_field(ZipCode, &["CODIGO POSTAL", "CP", "ZIP", "POSTAL CODE"])
            .with_field(BanNumber, &["BAN", "NUMERO BAN", "BAN NUMBER", "NUM BAN", "CUENTA"])
            .with_field(AccountType, &["TIPO CUENTA", "ACCOUNT TYPE", "TIPO", "CATEGORY"])
            .with_field(Status, &["ESTADO", "STATUS", "ESTATUS", "ACTIVO"])
            .with_field(
                SubscriberPhone,
                &["SUB", "TELEFONO SUSCRIPTOR", "NUMERO", "PHONE NUMBER", "LINE", "LINEA"],
            )
            .with_field(Plan, &["PLAN", "SERVICIO", "SERVICE"])
            .with_field(MonthlyValue, &["VALOR MENSUAL", "MONTHLY VALUE", "PRECIO", "PRICE", "VALOR"])
            .with_field(RemainingPayments, &["PAGOS RESTANTES", "REMAINING PAYMENTS", "MESES RESTANTES"])
            .with_field(ContractTerm, &["PLAZO CONTRATO", "CONTRACT TERM", "MESES CONTRATO", "TERM"])
            .with_field(
                ContractEndDate,
                &["FECHA FIN CONTRATO", "CONTRACT END DATE", "VENCIMIENTO", "FIN CONTRATO"],
            )
    }
}

impl AliasTable<AuditField> {
    /// Built-in aliases for legacy line-level exports used by audits.
    pub fn audit_defaults() -> Self {
        use AuditField::*;

        AliasTable::new()
            .with_field(Phone, &["SUBSCRIBER_NO", "CELULAR", "TELEFONO", "PHONE", "SUSCRIBER"])
            .with_field(Ban, &["BAN", "ACCT_NO"])
            .with_field(Imei, &["IMEI", "SERIAL", "EMAI"])
            .with_field(Plan, &["PRICE_CODE", "PLAN"])
            .with_field(ActivationDate, &["INIT_ACTIVATION_DATE", "FECHA"])
            .with_field(Imsi, &["IMSI", "SIMCARD"])
            .with_field(ProductType, &["PRODUCT_TYPE", "SEGURO", "TIPO_CELU", "SEG"])
            .with_field(Name, &["NOMBRE", "NAME", "CUSTOMER"])
            .with_field(VoiceCode, &["CODIGO_VOZ", "CODIGOVOZ", "CODIGO VOZ"])
            .with_field(Value, &["VALOR", "RENTA", "MONTHLY", "PRICE"])
    }
}

// ============================================================================
// COLUMN MAPPING
// ============================================================================

/// Result of resolving an alias table: field → column index, plus the
/// header snapshot it was resolved against.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMapping<F: FieldName> {
    columns: HashMap<F, usize>,
    headers: Vec<String>,
}

impl<F: FieldName> ColumnMapping<F> {
    pub fn column(&self, field: F) -> Option<usize> {
        self.columns.get(&field).copied()
    }

    pub fn contains(&self, field: F) -> bool {
        self.columns.contains_key(&field)
    }

    /// Index of the first header exactly equal (case-insensitive, trimmed)
    /// to `label`. Bypasses the alias table.
    pub fn exact_header(&self, label: &str) -> Option<usize> {
        self.headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(label))
    }

    /// Number of fields that found a column.
    pub fn mapped(&self) -> usize {
        self.columns.len()
    }
}

// ============================================================================
// TESTS
// ============================================================================
