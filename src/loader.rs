use lazy_static::lazy_static;
use log::{debug, info};
use regex::Regex;
use std::path::Path;
use thiserror::Error;

use crate::equipment::{EquipmentDraft, EquipmentType};

lazy_static! {
    // Anything that is not a letter or digit is ignored when matching headers
    static ref HEADER_NOISE: Regex = Regex::new(r"[^a-z0-9]").unwrap();
}

/// Upper bound for an uploaded CSV file (10 MiB)
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Columns every upload must provide, in canonical order
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Column {
    Name,
    Type,
    Flowrate,
    Pressure,
    Temperature,
}

impl Column {
    pub const ALL: [Column; 5] = [
        Column::Name,
        Column::Type,
        Column::Flowrate,
        Column::Pressure,
        Column::Temperature,
    ];

    /// Header text as it appears in the reference sample file
    pub fn label(self) -> &'static str {
        match self {
            Column::Name => "Equipment Name",
            Column::Type => "Type",
            Column::Flowrate => "Flowrate",
            Column::Pressure => "Pressure",
            Column::Temperature => "Temperature",
        }
    }

    fn from_header(cell: &str) -> Option<Column> {
        let folded = HEADER_NOISE.replace_all(&cell.trim().to_lowercase(), "").into_owned();
        match folded.as_str() {
            "equipmentname" | "name" => Some(Column::Name),
            "type" | "equipmenttype" => Some(Column::Type),
            "flowrate" => Some(Column::Flowrate),
            "pressure" => Some(Column::Pressure),
            "temperature" => Some(Column::Temperature),
            _ => None,
        }
    }
}

/// Reasons an upload is rejected as a whole
#[derive(Debug, Error, PartialEq)]
pub enum LoadError {
    #[error("File must be a CSV")]
    UnsupportedExtension(String),

    #[error("File has no extension")]
    MissingExtension,

    #[error("File is too large ({size} bytes, limit is {limit} bytes)")]
    TooLarge { size: usize, limit: usize },

    #[error("File is not valid UTF-8 text")]
    NotUtf8,

    #[error("CSV file is empty")]
    Empty,

    #[error("Missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<&'static str>),

    #[error("CSV file contains no valid rows ({skipped} rows skipped)")]
    NoValidRows { skipped: usize },
}

/// Why a single data row was skipped
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RowError {
    #[error("equipment name is empty")]
    MissingName,

    #[error("equipment type is empty")]
    MissingType,

    #[error("missing value for {0}")]
    MissingField(&'static str),

    #[error("{column} value {value:?} is not a finite number")]
    InvalidNumber { column: &'static str, value: String },
}

/// A data row that did not become a record
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedRow {
    /// 1-based line number in the file (the header is line 1)
    pub line: usize,
    pub reason: RowError,
}

/// Result of parsing an upload: valid drafts in file order plus the rows
/// that were dropped
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedUpload {
    pub records: Vec<EquipmentDraft>,
    pub skipped: Vec<SkippedRow>,
}

impl ParsedUpload {
    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }
}

// Position of each required column in the header row
#[derive(Debug, Clone, Copy)]
struct ColumnMap {
    name: usize,
    kind: usize,
    flowrate: usize,
    pressure: usize,
    temperature: usize,
}

/// Check that an uploaded file name carries a `.csv` extension
///
/// # Arguments
/// * `filename` - Client-supplied file name
///
/// # Returns
/// * `Result<(), LoadError>` - Ok for `.csv` (any case), an error otherwise
pub fn check_filename(filename: &str) -> Result<(), LoadError> {
    let extension = Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase());

    match extension.as_deref() {
        Some("csv") => Ok(()),
        Some(ext) => Err(LoadError::UnsupportedExtension(ext.to_string())),
        None => Err(LoadError::MissingExtension),
    }
}

/// Parse raw upload bytes into equipment drafts
///
/// Enforces the size bound, decodes UTF-8 (a leading byte order mark is
/// ignored) and then delegates to [`from_csv_str`].
///
/// # Arguments
/// * `bytes` - Raw file content
/// * `limit` - Maximum accepted size in bytes
///
/// # Returns
/// * `Result<ParsedUpload, LoadError>` - Valid drafts and skipped rows, or a whole-file error
pub fn from_csv_bytes(bytes: &[u8], limit: usize) -> Result<ParsedUpload, LoadError> {
    if bytes.len() > limit {
        return Err(LoadError::TooLarge {
            size: bytes.len(),
            limit,
        });
    }
    let content = std::str::from_utf8(bytes).map_err(|_| LoadError::NotUtf8)?;
    from_csv_str(content)
}

/// Parse CSV text into equipment drafts
///
/// The first non-blank record is the header. Every following non-blank
/// record is one record attempt; rows that fail validation are skipped and
/// reported in [`ParsedUpload::skipped`] rather than failing the file.
/// Records end at a newline outside double quotes, so a quoted field may
/// span several lines.
///
/// # Errors
/// * `LoadError::Empty` if there is no header
/// * `LoadError::MissingColumns` if the header lacks a required column
/// * `LoadError::NoValidRows` if every data row was rejected
///
/// # Examples
/// ```
/// use equipviz::loader::from_csv_str;
///
/// let csv = "Equipment Name,Type,Flowrate,Pressure,Temperature\n\
///            Pump-1,Pump,120,5.2,110\n\
///            Broken,Pump,abc,1,1\n";
/// let parsed = from_csv_str(csv).unwrap();
/// assert_eq!(parsed.records.len(), 1);
/// assert_eq!(parsed.skipped_count(), 1);
/// ```
pub fn from_csv_str(content: &str) -> Result<ParsedUpload, LoadError> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let mut lines = split_records(content)
        .into_iter()
        .filter(|(_, line)| !line.trim().is_empty());

    let (_, header) = lines.next().ok_or(LoadError::Empty)?;
    let columns = parse_header(&header)?;

    let parsed = lines.fold(ParsedUpload::default(), |mut acc, (line_no, line)| {
        let fields = parse_csv_row(&line);
        match parse_row(&fields, &columns) {
            Ok(draft) => acc.records.push(draft),
            Err(reason) => {
                debug!("skipping CSV line {}: {}", line_no, reason);
                acc.skipped.push(SkippedRow {
                    line: line_no,
                    reason,
                });
            }
        }
        acc
    });

    if parsed.records.is_empty() {
        return Err(LoadError::NoValidRows {
            skipped: parsed.skipped_count(),
        });
    }

    info!(
        "parsed CSV: {} records accepted, {} rows skipped",
        parsed.records.len(),
        parsed.skipped_count()
    );
    Ok(parsed)
}

fn parse_header(line: &str) -> Result<ColumnMap, LoadError> {
    let cells = parse_csv_row(line);
    let position = |wanted: Column| {
        cells
            .iter()
            .position(|cell| Column::from_header(cell) == Some(wanted))
    };

    let found: Vec<(Column, Option<usize>)> =
        Column::ALL.iter().map(|&col| (col, position(col))).collect();
    let missing: Vec<&'static str> = found
        .iter()
        .filter(|(_, idx)| idx.is_none())
        .map(|(col, _)| col.label())
        .collect();
    if !missing.is_empty() {
        return Err(LoadError::MissingColumns(missing));
    }

    let index = |col: Column| {
        found
            .iter()
            .find(|(c, _)| *c == col)
            .and_then(|(_, idx)| *idx)
            .unwrap_or_default()
    };
    Ok(ColumnMap {
        name: index(Column::Name),
        kind: index(Column::Type),
        flowrate: index(Column::Flowrate),
        pressure: index(Column::Pressure),
        temperature: index(Column::Temperature),
    })
}

fn parse_row(fields: &[String], columns: &ColumnMap) -> Result<EquipmentDraft, RowError> {
    let field = |idx: usize, column: Column| {
        fields
            .get(idx)
            .map(|value| value.trim())
            .ok_or(RowError::MissingField(column.label()))
    };

    let name = field(columns.name, Column::Name)?;
    if name.is_empty() {
        return Err(RowError::MissingName);
    }
    let kind = field(columns.kind, Column::Type)?;
    if kind.is_empty() {
        return Err(RowError::MissingType);
    }

    Ok(EquipmentDraft {
        name: name.to_string(),
        equipment_type: EquipmentType::parse(kind),
        flowrate: parse_number(field(columns.flowrate, Column::Flowrate)?, Column::Flowrate)?,
        pressure: parse_number(field(columns.pressure, Column::Pressure)?, Column::Pressure)?,
        temperature: parse_number(
            field(columns.temperature, Column::Temperature)?,
            Column::Temperature,
        )?,
    })
}

fn parse_number(raw: &str, column: Column) -> Result<f64, RowError> {
    match raw.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(RowError::InvalidNumber {
            column: column.label(),
            value: raw.to_string(),
        }),
    }
}

// Parse a CSV row into a vector of strings
// Split text into raw records paired with the 1-based line each starts on.
// Newlines inside double quotes belong to the field; a trailing `\r` is
// dropped from every record.
fn split_records(content: &str) -> Vec<(usize, String)> {
    let mut records = Vec::new();
    let mut current = String::new();
    let mut start_line = 1;
    let mut line = 1;
    let mut in_quotes = false;

    for c in content.chars() {
        match c {
            '"' => {
                // A doubled quote toggles twice and leaves the state unchanged
                in_quotes = !in_quotes;
                current.push(c);
            }
            '\n' => {
                line += 1;
                if in_quotes {
                    current.push(c);
                } else {
                    if current.ends_with('\r') {
                        current.pop();
                    }
                    records.push((start_line, std::mem::take(&mut current)));
                    start_line = line;
                }
            }
            _ => current.push(c),
        }
    }

    if !current.is_empty() {
        if current.ends_with('\r') {
            current.pop();
        }
        records.push((start_line, current));
    }
    records
}

fn parse_csv_row(line: &str) -> Vec<String> {
    let mut result = Vec::new();
    let mut current_field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                if in_quotes && chars.peek() == Some(&'"') {
                    // Escaped quote inside a quoted field
                    current_field.push('"');
                    chars.next();
                } else {
                    in_quotes = !in_quotes;
                }
            }
            ',' if !in_quotes => {
                result.push(std::mem::take(&mut current_field));
            }
            _ => current_field.push(c),
        }
    }

    result.push(current_field);
    result
}
