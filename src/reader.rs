// 📥 Tabular Reader - spreadsheet file → CellGrid
// One reader per file format, chosen from the file extension

use anyhow::{anyhow, Context, Result};
use calamine::Reader;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;

// ============================================================================
// CELLS
// ============================================================================

/// One raw cell value as produced by a spreadsheet export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
}

impl Cell {
    /// True for empty cells and for text made only of whitespace.
    pub fn is_blank(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(s) => s.trim().is_empty(),
            Cell::Number(_) | Cell::Bool(_) => false,
        }
    }

    /// Render the cell as text, untrimmed.
    ///
    /// Integral numbers have no decimal part: a phone number stored as the
    /// float 7875551111.0 renders as "7875551111".
    pub fn as_text(&self) -> String {
        match self {
            Cell::Empty => String::new(),
            Cell::Text(s) => s.clone(),
            Cell::Number(n) => format_number(*n),
            Cell::Bool(b) => b.to_string(),
        }
    }

    /// Numeric view of the cell. Text is parsed after stripping currency
    /// symbols and thousands separators.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Cell::Number(n) => Some(*n),
            Cell::Text(s) => parse_loose_number(s),
            Cell::Empty | Cell::Bool(_) => None,
        }
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        if value.is_empty() {
            Cell::Empty
        } else {
            Cell::Text(value.to_string())
        }
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// Parse "1,234.50", "$45", " 12 " into a number. Returns None for text that
/// holds no number at all.
pub fn parse_loose_number(text: &str) -> Option<f64> {
    let cleaned: String = text
        .trim()
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();

    if cleaned.is_empty() {
        return None;
    }

    cleaned.parse::<f64>().ok().filter(|n| n.is_finite())
}

// ============================================================================
// CELL GRID
// ============================================================================

/// Header keywords that identify the header row of an upstream export.
pub const HEADER_KEYWORDS: &[&str] = &[
    "CELULAR",
    "TELEFONO",
    "PHONE",
    "BAN",
    "SUBSCRIBER",
    "SUBSCRIBER_NO",
    "ACCT_NO",
];

/// Rectangular-ish array of rows. Rows may be ragged; missing trailing cells
/// read as blank.
#[derive(Debug, Clone, Default)]
pub struct CellGrid {
    rows: Vec<Vec<Cell>>,
}

impl CellGrid {
    pub fn new(rows: Vec<Vec<Cell>>) -> Self {
        CellGrid { rows }
    }

    /// Build a grid from string literals. Empty strings become `Cell::Empty`.
    pub fn from_strings(rows: &[&[&str]]) -> Self {
        CellGrid {
            rows: rows
                .iter()
                .map(|row| row.iter().map(|s| Cell::from(*s)).collect())
                .collect(),
        }
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    /// Index of the first row holding one of the header keywords
    /// (case-insensitive substring match), or 0 when no row does.
    pub fn header_row_index(&self) -> usize {
        self.rows
            .iter()
            .position(|row| {
                row.iter().any(|cell| {
                    let text = cell.as_text().to_uppercase();
                    HEADER_KEYWORDS.iter().any(|k| text.contains(k))
                })
            })
            .unwrap_or(0)
    }

    /// Header labels of the detected header row.
    pub fn headers(&self) -> Vec<String> {
        self.rows
            .get(self.header_row_index())
            .map(|row| row.iter().map(Cell::as_text).collect())
            .unwrap_or_default()
    }

    /// Rows below the header, paired with their 1-based row number in the
    /// source file.
    pub fn data_rows(&self) -> impl Iterator<Item = (usize, &[Cell])> {
        let start = self.header_row_index() + 1;
        self.rows
            .iter()
            .enumerate()
            .skip(start)
            .map(|(idx, row)| (idx + 1, row.as_slice()))
    }
}

// ============================================================================
// FILE FORMATS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileFormat {
    Csv,
    Workbook,
}

impl FileFormat {
    pub fn name(&self) -> &str {
        match self {
            FileFormat::Csv => "CSV",
            FileFormat::Workbook => "Workbook",
        }
    }
}

/// Detect the file format from the extension.
pub fn detect_format(file_path: &Path) -> Result<FileFormat> {
    let extension = file_path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    match extension.as_str() {
        "csv" | "txt" => Ok(FileFormat::Csv),
        "xlsx" | "xlsm" | "xls" | "ods" => Ok(FileFormat::Workbook),
        _ => Err(anyhow!(
            "Unsupported spreadsheet format: {}",
            file_path.display()
        )),
    }
}

/// Turns a spreadsheet file into a grid of raw cells.
pub trait TabularReader {
    fn read(&self, file_path: &Path) -> Result<CellGrid>;

    fn format(&self) -> FileFormat;
}

/// Pick the reader for a format. `sheet` only applies to workbooks.
pub fn get_reader(format: FileFormat, sheet: Option<&str>) -> Box<dyn TabularReader> {
    match format {
        FileFormat::Csv => Box::new(CsvGridReader),
        FileFormat::Workbook => Box::new(WorkbookReader {
            sheet: sheet.map(str::to_string),
        }),
    }
}

/// Detect the format and read the file in one step.
pub fn read_grid(file_path: &Path, sheet: Option<&str>) -> Result<CellGrid> {
    let format = detect_format(file_path)?;
    log::debug!("Reading {} as {}", file_path.display(), format.name());
    get_reader(format, sheet).read(file_path)
}

// ============================================================================
// READERS
// ============================================================================

pub struct CsvGridReader;

impl TabularReader for CsvGridReader {
    fn read(&self, file_path: &Path) -> Result<CellGrid> {
        let file = File::open(file_path)
            .with_context(|| format!("Failed to open file: {}", file_path.display()))?;

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(file);

        let mut rows = Vec::new();
        for (line_num, result) in reader.records().enumerate() {
            let record = result.with_context(|| {
                format!(
                    "Failed to parse CSV line {} in {}",
                    line_num + 1,
                    file_path.display()
                )
            })?;
            rows.push(record.iter().map(Cell::from).collect());
        }

        Ok(CellGrid::new(rows))
    }

    fn format(&self) -> FileFormat {
        FileFormat::Csv
    }
}

/// Reads .xlsx/.xls/.ods through calamine. Uses the named sheet when given,
/// otherwise the first one.
pub struct WorkbookReader {
    pub sheet: Option<String>,
}

impl TabularReader for WorkbookReader {
    fn read(&self, file_path: &Path) -> Result<CellGrid> {
        let mut workbook = calamine::open_workbook_auto(file_path)
            .with_context(|| format!("Failed to open workbook: {}", file_path.display()))?;

        let names = workbook.sheet_names();
        let sheet_name = match &self.sheet {
            Some(wanted) => names
                .iter()
                .find(|name| name.as_str() == wanted)
                .cloned()
                .ok_or_else(|| anyhow!("Sheet '{}' not found in {}", wanted, file_path.display()))?,
            None => names
                .first()
                .cloned()
                .ok_or_else(|| anyhow!("No sheets in {}", file_path.display()))?,
        };

        let range = workbook
            .worksheet_range(&sheet_name)
            .with_context(|| format!("Failed to read sheet '{}'", sheet_name))?;

        let rows = range
            .rows()
            .map(|row| row.iter().map(convert_cell).collect())
            .collect();

        Ok(CellGrid::new(rows))
    }

    fn format(&self) -> FileFormat {
        FileFormat::Workbook
    }
}

fn convert_cell(data: &calamine::Data) -> Cell {
    match data {
        calamine::Data::Empty => Cell::Empty,
        calamine::Data::String(s) => Cell::from(s.as_str()),
        calamine::Data::Float(f) => Cell::Number(*f),
        calamine::Data::Int(i) => Cell::Number(*i as f64),
        calamine::Data::Bool(b) => Cell::Bool(*b),
        calamine::Data::DateTime(dt) => Cell::Number(dt.as_f64()),
        calamine::Data::DateTimeIso(s) => Cell::from(s.as_str()),
        _ => Cell::Empty,
    }
}

// ============================================================================
// TESTS
// ============================================================================
