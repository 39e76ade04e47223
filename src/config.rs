// ⚙️ Engine Configuration - JSON file, every field optional
//
// {
//   "database_path": "crm.db",
//   "remote_database_path": "remote.db",
//   "dry_run": true,
//   "sheet": "Hoja1",
//   "extra_aliases": { "ban_number": ["ACCT"] },
//   "contract_reference_date": "2025-01-01",
//   "max_reported_errors": 10
// }

use crate::schema::{AliasTable, CanonicalField};
use anyhow::{anyhow, Context, Result};
use chrono::{Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub database_path: PathBuf,
    pub remote_database_path: PathBuf,

    /// Import without writing unless told otherwise.
    pub dry_run: bool,

    /// Workbook sheet to read (first sheet when absent).
    pub sheet: Option<String>,

    /// canonical field name → aliases appended after the built-in ones
    pub extra_aliases: BTreeMap<String, Vec<String>>,

    /// `YYYY-MM-DD`; remaining payments count from this date's month.
    /// Defaults to the current month.
    pub contract_reference_date: Option<String>,

    /// How many row errors the CLI prints.
    pub max_reported_errors: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            database_path: PathBuf::from("crm.db"),
            remote_database_path: PathBuf::from("remote.db"),
            dry_run: true,
            sheet: None,
            extra_aliases: BTreeMap::new(),
            contract_reference_date: None,
            max_reported_errors: 10,
        }
    }
}

impl EngineConfig {
    /// Load config from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: EngineConfig = serde_json::from_str(&content)
            .context("Failed to parse config JSON")?;

        // Surface bad field names and dates at load time
        config.import_aliases()?;
        config.reference_date()?;

        Ok(config)
    }

    /// Built-in import aliases plus the configured extras.
    pub fn import_aliases(&self) -> Result<AliasTable<CanonicalField>> {
        let mut table = AliasTable::import_defaults();

        for (name, aliases) in &self.extra_aliases {
            let field = CanonicalField::from_name(name)
                .ok_or_else(|| anyhow!("Unknown canonical field in extra_aliases: {}", name))?;
            table.add_aliases(field, aliases.iter().cloned());
        }

        Ok(table)
    }

    /// Reference date for contract end derivation, first of its month.
    pub fn reference_date(&self) -> Result<NaiveDate> {
        let date = match &self.contract_reference_date {
            Some(text) => NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .with_context(|| format!("Invalid contract_reference_date: {}", text))?,
            None => Utc::now().date_naive(),
        };

        Ok(date.with_day(1).unwrap_or(date))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(json: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", json).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let file = write_config("{}");
        let config = EngineConfig::from_file(file.path()).unwrap();

        assert_eq!(config, EngineConfig::default());
        assert!(config.dry_run);
        assert_eq!(config.max_reported_errors, 10);
    }

    #[test]
    fn test_extra_aliases_extend_table() {
        let file = write_config(r#"{"extra_aliases": {"ban_number": ["acct"]}, "dry_run": false}"#);
        let config = EngineConfig::from_file(file.path()).unwrap();

        assert!(!config.dry_run);
        let table = config.import_aliases().unwrap();
        assert_eq!(table.aliases(CanonicalField::BanNumber).first().map(String::as_str), Some("BAN"));
        assert_eq!(table.aliases(CanonicalField::BanNumber).last().map(String::as_str), Some("ACCT"));
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let file = write_config(r#"{"extra_aliases": {"favourite_colour": ["X"]}}"#);
        let err = EngineConfig::from_file(file.path()).unwrap_err();

        assert!(err.to_string().contains("favourite_colour"));
    }

    #[test]
    fn test_reference_date() {
        let config = EngineConfig {
            contract_reference_date: Some("2025-03-17".to_string()),
            ..Default::default()
        };
        assert_eq!(config.reference_date().unwrap(), NaiveDate::from_ymd_opt(2025, 3, 1).unwrap());

        let bad = EngineConfig {
            contract_reference_date: Some("17/03/2025".to_string()),
            ..Default::default()
        };
        assert!(bad.reference_date().is_err());
    }

    #[test]
    fn test_missing_file() {
        assert!(EngineConfig::from_file("/nonexistent/crm.json").is_err());
    }
}
