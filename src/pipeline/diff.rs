//! Delta calculation and the publish decision.
//!
//! The delta is taken over the current snapshot's municipalities; anything
//! only the baseline knows about is dropped, anything only the current
//! snapshot knows about is compared against zero. Only macro growth decides
//! whether a run is announced.

use regex::Regex;

use crate::error::{AppError, Result};
use crate::models::{Category, CountDelta, DiffConfig, Snapshot, StationCounts};

/// Summary text when nothing is announced.
pub const NO_UPDATE: &str = "更新なし";

/// Change for one municipality.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaRow {
    /// Reporting name (district prefix stripped)
    pub municipality: String,
    pub delta: CountDelta,
}

/// Per-municipality changes in current-snapshot row order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delta {
    pub rows: Vec<DeltaRow>,
}

impl Delta {
    /// Sum of one category's change.
    pub fn total(&self, category: Category) -> i64 {
        self.rows.iter().map(|r| r.delta[category]).sum()
    }

    pub fn get(&self, municipality: &str) -> Option<&CountDelta> {
        self.rows
            .iter()
            .find(|r| r.municipality == municipality)
            .map(|r| &r.delta)
    }

    /// Rows with a strictly positive change in `category`.
    pub fn increases(&self, category: Category) -> impl Iterator<Item = &DeltaRow> {
        self.rows.iter().filter(move |r| r.delta[category] > 0)
    }
}

/// Outcome of comparing a snapshot with its baseline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishDecision {
    /// Macro stations grew overall
    pub worthy: bool,
    pub macro_total: i64,
    /// One `"<name> <+n>"` line per growing municipality, or [`NO_UPDATE`]
    pub summary: String,
    pub delta: Delta,
}

/// Calculator for deltas and publish decisions.
#[derive(Debug, Clone, Default)]
pub struct DiffCalculator {
    /// Anchored alternation of district prefixes to strip
    strip_pattern: Option<Regex>,
}

impl DiffCalculator {
    /// Create a calculator stripping the given name prefixes.
    pub fn new(strip_prefixes: &[String]) -> Result<Self> {
        let prefixes: Vec<String> = strip_prefixes
            .iter()
            .filter(|p| !p.is_empty())
            .map(|p| regex::escape(p))
            .collect();

        if prefixes.is_empty() {
            return Ok(Self::default());
        }

        let pattern = format!("^(?:{})", prefixes.join("|"));
        let strip_pattern = Regex::new(&pattern)
            .map_err(|e| AppError::config(format!("invalid diff.strip_prefixes: {e}")))?;

        Ok(Self {
            strip_pattern: Some(strip_pattern),
        })
    }

    pub fn from_config(config: &DiffConfig) -> Result<Self> {
        Self::new(&config.strip_prefixes)
    }

    /// Reporting name for a municipality.
    pub fn normalize_name(&self, name: &str) -> String {
        match &self.strip_pattern {
            Some(pattern) => pattern.replace(name, "").into_owned(),
            None => name.to_string(),
        }
    }

    /// `current - baseline`, reindexed to `current`. A missing baseline is all zero.
    pub fn delta(&self, current: &Snapshot, baseline: Option<&Snapshot>) -> Delta {
        let zero = StationCounts::default();
        let rows = current
            .rows()
            .map(|(name, counts)| {
                let previous = baseline.and_then(|b| b.get(name)).unwrap_or(&zero);
                DeltaRow {
                    municipality: self.normalize_name(name),
                    delta: counts.delta_from(previous),
                }
            })
            .collect();

        Delta { rows }
    }

    /// Compare `current` with `baseline` and decide whether to announce.
    pub fn decide(&self, current: &Snapshot, baseline: Option<&Snapshot>) -> PublishDecision {
        let delta = self.delta(current, baseline);
        let macro_total = delta.total(Category::Macro);
        let worthy = macro_total > 0;

        let summary = if worthy {
            delta
                .increases(Category::Macro)
                .map(|r| format!("{} {:+}", r.municipality, r.delta[Category::Macro]))
                .collect::<Vec<_>>()
                .join("\n")
        } else {
            NO_UPDATE.to_string()
        };

        PublishDecision {
            worthy,
            macro_total,
            summary,
            delta,
        }
    }
}

/// Decide with no name normalisation.
pub fn decide(current: &Snapshot, baseline: Option<&Snapshot>) -> PublishDecision {
    DiffCalculator::default().decide(current, baseline)
}
