// src/storage/csv.rs

//! Snapshot CSV encoding.
//!
//! UTF-8 with a byte-order mark, one header row, one row per municipality:
//!
//! ```text
//! 市町村,マクロ,フェムト,ミリ波,sub6
//! 今治市,120,4,0,6
//! ```

use std::mem::take;

use crate::error::{AppError, Result};
use crate::models::{Category, Snapshot, StationCounts, UpdateToken};

const BOM: char = '\u{feff}';

/// Header of the municipality column.
pub const INDEX_HEADER: &str = "市町村";

/// Encode a snapshot, rows in snapshot order.
pub fn encode(snapshot: &Snapshot) -> String {
    let mut out = String::new();
    out.push(BOM);

    out.push_str(INDEX_HEADER);
    for category in Category::ALL {
        out.push(',');
        out.push_str(category.label());
    }
    out.push('\n');

    for (name, counts) in snapshot.rows() {
        out.push_str(&escape(name));
        for (_, count) in counts.iter() {
            out.push(',');
            out.push_str(&count.to_string());
        }
        out.push('\n');
    }
    out
}

/// Decode a snapshot file.
///
/// Columns are matched by label; category columns missing from the file read
/// as zero, unknown columns are ignored.
pub fn decode(text: &str, updated: UpdateToken) -> Result<Snapshot> {
    let text = text.strip_prefix(BOM).unwrap_or(text);
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());

    let header = lines
        .next()
        .ok_or_else(|| AppError::storage("snapshot file is empty"))?;
    let columns: Vec<Option<Category>> = split_fields(header)
        .iter()
        .skip(1)
        .map(|label| {
            let category = Category::from_label(label.trim());
            if category.is_none() {
                log::warn!("Ignoring unknown snapshot column '{label}'");
            }
            category
        })
        .collect();

    let mut rows = Vec::new();
    for (line_no, line) in lines.enumerate() {
        let fields = split_fields(line);
        let (name, values) = fields
            .split_first()
            .ok_or_else(|| AppError::storage(format!("row {} is empty", line_no + 2)))?;

        let mut counts = StationCounts::default();
        for (value, column) in values.iter().zip(&columns) {
            let Some(category) = column else { continue };
            counts[*category] = parse_count(value).ok_or_else(|| {
                AppError::storage(format!(
                    "row {} ({name}): invalid {category} count '{value}'",
                    line_no + 2
                ))
            })?;
        }
        rows.push((name.clone(), counts));
    }

    Ok(Snapshot::from_rows(updated, rows))
}

/// Counts written by older tools may carry a float suffix (`12.0`).
fn parse_count(value: &str) -> Option<u64> {
    let value = value.trim();
    if value.is_empty() {
        return Some(0);
    }
    value
        .parse::<u64>()
        .ok()
        .or_else(|| value.strip_suffix(".0").and_then(|v| v.parse().ok()))
}

fn escape(field: &str) -> String {
    if field.contains([',', '"', '\n']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Split one line into fields, honouring double quotes.
fn split_fields(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' if in_quotes => {
                if matches!(chars.peek(), Some('"')) {
                    chars.next();
                    field.push('"');
                } else {
                    in_quotes = false;
                }
            }
            '"' => in_quotes = true,
            ',' if !in_quotes => fields.push(take(&mut field)),
            _ => field.push(ch),
        }
    }
    fields.push(field);
    fields
}
