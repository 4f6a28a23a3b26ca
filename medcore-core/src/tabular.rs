//! Tabular decoding of uploaded user files
//!
//! CSV (with encoding and delimiter sniffing), spreadsheets (first sheet
//! only) and JSON arrays of objects all come out as ordered `RawRow`s.
//! No row is dropped here; blank-row filtering belongs to normalization.

use crate::error::{ImportError, Result};
use calamine::{Data, Reader};
use chrono::NaiveTime;
use serde_json::{Map, Value};
use std::io::Cursor;

/// One input record keyed by the column names exactly as found in the file.
pub type RawRow = Map<String, Value>;

const DELIMITER_CHARS: [char; 3] = [',', ';', '\t'];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Csv,
    Spreadsheet,
    Json,
}

impl FileFormat {
    /// Pick the decoder from the file extension (case-insensitive).
    pub fn from_filename(filename: &str) -> Result<Self> {
        let ext = filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
            .ok_or_else(|| ImportError::UnsupportedFormat(format!("'{}' has no extension", filename)))?;

        match ext.as_str() {
            "csv" => Ok(FileFormat::Csv),
            "xlsx" | "xls" => Ok(FileFormat::Spreadsheet),
            "json" => Ok(FileFormat::Json),
            other => Err(ImportError::UnsupportedFormat(format!(".{}", other))),
        }
    }
}

/// Decode an uploaded buffer into rows, choosing the format from `filename`.
pub fn decode(buffer: &[u8], filename: &str) -> Result<Vec<RawRow>> {
    let rows = match FileFormat::from_filename(filename)? {
        FileFormat::Csv => decode_csv(buffer)?,
        FileFormat::Spreadsheet => decode_spreadsheet(buffer)?,
        FileFormat::Json => decode_json(buffer)?,
    };
    tracing::debug!(filename, rows = rows.len(), "Decoded upload");
    Ok(rows)
}

/// Turn CSV bytes into text, honoring UTF-16 byte-order marks.
///
/// UTF-8 text that contains NUL characters is assumed to be BOM-less
/// UTF-16LE and decoded again. A leading U+FEFF is always stripped.
pub fn decode_text(buffer: &[u8]) -> String {
    let text = if buffer.starts_with(&[0xFF, 0xFE]) {
        utf16le(buffer)
    } else if buffer.starts_with(&[0xFE, 0xFF]) {
        let swapped: Vec<u8> = buffer[2..]
            .chunks_exact(2)
            .flat_map(|pair| [pair[1], pair[0]])
            .collect();
        utf16le(&swapped)
    } else {
        let utf8 = String::from_utf8_lossy(buffer);
        if utf8.contains('\0') {
            utf16le(buffer)
        } else {
            utf8.into_owned()
        }
    };

    match text.strip_prefix('\u{FEFF}') {
        Some(rest) => rest.to_string(),
        None => text,
    }
}

fn utf16le(buffer: &[u8]) -> String {
    let units = buffer
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]));
    char::decode_utf16(units)
        .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

/// Guess the delimiter from the first line: semicolon whenever one is
/// present, tab when it beats comma, comma otherwise. A wrong guess shows up
/// as a collapsed header and is retried by the caller.
pub fn sniff_delimiter(first_line: &str) -> u8 {
    if first_line.contains(';') {
        return b';';
    }
    let commas = first_line.matches(',').count();
    let tabs = first_line.matches('\t').count();
    if tabs > commas { b'\t' } else { b',' }
}

fn decode_csv(buffer: &[u8]) -> Result<Vec<RawRow>> {
    let text = decode_text(buffer);
    let first_line = text.lines().next().unwrap_or("");
    let candidates = [sniff_delimiter(first_line), b',', b';', b'\t'];

    for delimiter in candidates {
        match parse_csv(&text, delimiter) {
            Ok((headers, rows)) => {
                // A lone header that still holds a delimiter means the guess was wrong
                if headers.len() == 1 && headers[0].contains(DELIMITER_CHARS) {
                    tracing::debug!(delimiter = %(delimiter as char).escape_default(), "Header collapsed, retrying");
                    continue;
                }
                return Ok(rows);
            }
            Err(e) => {
                tracing::debug!(delimiter = %(delimiter as char).escape_default(), error = %e, "CSV parse attempt failed");
            }
        }
    }

    let (_, rows) = parse_csv(&text, b',')?;
    Ok(rows)
}

fn parse_csv(text: &str, delimiter: u8) -> std::result::Result<(Vec<String>, Vec<RawRow>), csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let mut row = RawRow::new();
        for (header, cell) in headers.iter().zip(record.iter()) {
            row.insert(header.clone(), Value::String(cell.trim().to_string()));
        }
        rows.push(row);
    }

    Ok((headers, rows))
}

fn decode_spreadsheet(buffer: &[u8]) -> Result<Vec<RawRow>> {
    let mut workbook = calamine::open_workbook_auto_from_rs(Cursor::new(buffer.to_vec()))
        .map_err(|e| ImportError::Workbook(e.to_string()))?;

    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or(ImportError::EmptyWorkbook)?;
    let range = workbook
        .worksheet_range(&sheet_name)
        .map_err(|e| ImportError::Workbook(e.to_string()))?;

    let mut lines = range.rows();
    let Some(header_cells) = lines.next() else {
        return Ok(Vec::new());
    };
    // Columns without a header carry no addressable field
    let headers: Vec<Option<String>> = header_cells
        .iter()
        .map(|cell| {
            let name = cell.to_string().trim().to_string();
            (!name.is_empty()).then_some(name)
        })
        .collect();

    let rows = lines
        .map(|cells| {
            let mut row = RawRow::new();
            for (idx, header) in headers.iter().enumerate() {
                let Some(header) = header else { continue };
                let value = cells
                    .get(idx)
                    .map(cell_value)
                    .unwrap_or_else(|| Value::String(String::new()));
                row.insert(header.clone(), value);
            }
            row
        })
        .collect();

    Ok(rows)
}

fn cell_value(cell: &Data) -> Value {
    match cell {
        Data::Empty => Value::String(String::new()),
        Data::String(s) => Value::String(s.trim().to_string()),
        Data::Int(i) => Value::from(*i),
        Data::Float(f) => serde_json::Number::from_f64(*f)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(f.to_string())),
        Data::Bool(b) => Value::Bool(*b),
        Data::DateTime(dt) => match dt.as_datetime() {
            Some(ts) if ts.time() == NaiveTime::MIN => {
                Value::String(ts.date().format("%Y-%m-%d").to_string())
            }
            Some(ts) => Value::String(ts.format("%Y-%m-%dT%H:%M:%S").to_string()),
            None => Value::from(dt.as_f64()),
        },
        Data::DateTimeIso(s) | Data::DurationIso(s) => Value::String(s.trim().to_string()),
        Data::Error(e) => Value::String(e.to_string()),
    }
}

fn decode_json(buffer: &[u8]) -> Result<Vec<RawRow>> {
    let bytes = buffer.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(buffer);
    Ok(serde_json::from_slice(bytes)?)
}
