// src/services/listing.rs

//! Parser for the per-area count listing embedded in licence notes.
//!
//! A bundled licence note lists station counts as `<name>(<count>)` tokens,
//! prefecture headers followed by their municipalities:
//!
//! ```text
//! 愛媛県(1,234) 松山市(400) 今治市(120) 香川県(980) 高松市(300)
//! ```

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::{AppError, Result};

/// Name endings that mark a prefecture-level header (都, 道, 府, 県).
pub const REGION_SUFFIXES: [char; 4] = ['都', '道', '府', '県'];

fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(\S+)\s*\(([0-9,]+)\)").expect("static pattern"))
}

/// Whether an entry is a header or belongs to one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    Header,
    Municipality { region: String },
}

/// One `<name>(<count>)` token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingEntry {
    pub name: String,
    pub count: u64,
    pub kind: EntryKind,
}

impl ListingEntry {
    pub fn region(&self) -> &str {
        match &self.kind {
            EntryKind::Header => &self.name,
            EntryKind::Municipality { region } => region,
        }
    }
}

/// Returns true if `name` is a prefecture-level header.
pub fn is_region_header(name: &str) -> bool {
    name.ends_with(REGION_SUFFIXES)
}

/// Parse a listing into ordered entries.
///
/// Municipalities inherit the closest preceding header. A municipality with
/// no header before it is an error.
pub fn parse_listing(text: &str) -> Result<Vec<ListingEntry>> {
    let mut entries = Vec::new();
    let mut current_region: Option<String> = None;

    for caps in token_pattern().captures_iter(text) {
        let name = caps[1].to_string();
        let count = parse_count(&caps[2]).map_err(|e| {
            AppError::parse(format!("{name}: {e}"))
        })?;

        let kind = if is_region_header(&name) {
            current_region = Some(name.clone());
            EntryKind::Header
        } else {
            let region = current_region.clone().ok_or_else(|| {
                AppError::parse(format!("entry '{name}' appears before any region header"))
            })?;
            EntryKind::Municipality { region }
        };

        entries.push(ListingEntry { name, count, kind });
    }

    Ok(entries)
}

fn parse_count(raw: &str) -> std::result::Result<u64, String> {
    let digits: String = raw.chars().filter(|c| *c != ',').collect();
    if digits.is_empty() {
        return Err(format!("empty count '{raw}'"));
    }
    digits
        .parse::<u64>()
        .map_err(|e| format!("invalid count '{raw}': {e}"))
}

/// Municipality entries under `region`, in listing order.
///
/// The region's own header row is excluded.
pub fn filter_region(entries: &[ListingEntry], region: &str) -> Vec<(String, u64)> {
    entries
        .iter()
        .filter(|e| matches!(&e.kind, EntryKind::Municipality { region: r } if r == region))
        .filter(|e| e.name != region)
        .map(|e| (e.name.clone(), e.count))
        .collect()
}

/// Extract the listing part of a licence note.
///
/// The first two lines are a preamble. Line breaks may be real newlines or
/// the escaped two-character `\n` the registry emits.
pub fn listing_body(note: &str) -> Option<String> {
    let normalized = note.replace("\\n", "\n");
    let mut parts = normalized.splitn(3, '\n');
    parts.next()?;
    parts.next()?;
    let body = parts.next()?;

    Some(
        body.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join(" "),
    )
}

/// Parse a note and keep the counts for `region`, keyed by municipality.
pub fn region_counts(note: &str, region: &str) -> Result<BTreeMap<String, u64>> {
    let body = listing_body(note)
        .ok_or_else(|| AppError::parse("note has no listing after its preamble"))?;
    let entries = parse_listing(&body)?;

    let mut counts = BTreeMap::new();
    for (name, count) in filter_region(&entries, region) {
        if counts.contains_key(&name) {
            log::warn!("Duplicate listing entry for {name}; summing counts");
        }
        *counts.entry(name).or_insert(0) += count;
    }
    Ok(counts)
}
