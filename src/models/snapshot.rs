//! Station categories, count series and snapshots.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Index, IndexMut};

use serde::{Deserialize, Serialize};

/// Base-station category tracked per municipality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    /// Full-power LTE station
    Macro,
    /// Small-cell indoor station
    Femto,
    /// 5G millimeter-wave band
    MilliWave,
    /// 5G sub-6 GHz band
    Sub6,
}

impl Category {
    /// All categories in column order.
    pub const ALL: [Category; 4] = [
        Category::Macro,
        Category::Femto,
        Category::MilliWave,
        Category::Sub6,
    ];

    /// Column label used in snapshot files and rendered tables.
    pub fn label(self) -> &'static str {
        match self {
            Category::Macro => "マクロ",
            Category::Femto => "フェムト",
            Category::MilliWave => "ミリ波",
            Category::Sub6 => "sub6",
        }
    }

    /// Inverse of [`Category::label`].
    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.label() == label)
    }

    fn index(self) -> usize {
        match self {
            Category::Macro => 0,
            Category::Femto => 1,
            Category::MilliWave => 2,
            Category::Sub6 => 3,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The registry's "last updated" marker.
///
/// Treated as opaque: compared for equality and used as a file name, never
/// interpreted as a date.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UpdateToken(String);

impl UpdateToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UpdateToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One count value per category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Counts<T>([T; 4]);

/// Station counts for one municipality.
pub type StationCounts = Counts<u64>;

/// Signed change in station counts for one municipality.
pub type CountDelta = Counts<i64>;

impl<T: Copy> Counts<T> {
    pub fn from_array(values: [T; 4]) -> Self {
        Self(values)
    }

    /// Iterate `(category, value)` in column order.
    pub fn iter(&self) -> impl Iterator<Item = (Category, T)> + '_ {
        Category::ALL.into_iter().map(|c| (c, self.0[c.index()]))
    }
}

impl<T> Index<Category> for Counts<T> {
    type Output = T;

    fn index(&self, category: Category) -> &T {
        &self.0[category.index()]
    }
}

impl<T> IndexMut<Category> for Counts<T> {
    fn index_mut(&mut self, category: Category) -> &mut T {
        &mut self.0[category.index()]
    }
}

impl StationCounts {
    /// `self - baseline` per category.
    pub fn delta_from(&self, baseline: &StationCounts) -> CountDelta {
        let mut delta = CountDelta::default();
        for category in Category::ALL {
            delta[category] = self[category] as i64 - baseline[category] as i64;
        }
        delta
    }
}

/// A single count observed for one municipality in one category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MunicipalityCount {
    pub prefecture: String,
    pub municipality: String,
    pub category: Category,
    pub count: u64,
}

/// Per-municipality counts for one category, as reported by one registry query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategorySeries {
    pub category: Category,
    pub prefecture: String,
    pub counts: BTreeMap<String, u64>,
    pub updated: UpdateToken,
}

impl CategorySeries {
    pub fn new(
        category: Category,
        prefecture: impl Into<String>,
        updated: UpdateToken,
    ) -> Self {
        Self {
            category,
            prefecture: prefecture.into(),
            counts: BTreeMap::new(),
            updated,
        }
    }

    /// Builder-style insert, mostly for tests.
    pub fn with(mut self, municipality: impl Into<String>, count: u64) -> Self {
        self.counts.insert(municipality.into(), count);
        self
    }

    /// Flatten into individual count records.
    pub fn records(&self) -> impl Iterator<Item = MunicipalityCount> + '_ {
        self.counts.iter().map(|(name, &count)| MunicipalityCount {
            prefecture: self.prefecture.clone(),
            municipality: name.clone(),
            category: self.category,
            count,
        })
    }

    /// Sum over all municipalities.
    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }
}

/// Complete per-municipality count table for one registry update.
///
/// Every row carries an explicit value for each category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub updated: UpdateToken,
    rows: BTreeMap<String, StationCounts>,
}

impl Snapshot {
    pub fn new(updated: UpdateToken) -> Self {
        Self {
            updated,
            rows: BTreeMap::new(),
        }
    }

    pub fn from_rows(
        updated: UpdateToken,
        rows: impl IntoIterator<Item = (String, StationCounts)>,
    ) -> Self {
        Self {
            updated,
            rows: rows.into_iter().collect(),
        }
    }

    /// Add a count record, creating a zeroed row if needed.
    pub fn fold(&mut self, record: MunicipalityCount) {
        let row = self.rows.entry(record.municipality).or_default();
        row[record.category] += record.count;
    }

    /// Rows sorted by municipality name.
    pub fn rows(&self) -> impl Iterator<Item = (&str, &StationCounts)> {
        self.rows.iter().map(|(name, counts)| (name.as_str(), counts))
    }

    pub fn get(&self, municipality: &str) -> Option<&StationCounts> {
        self.rows.get(municipality)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Sum of one category across all municipalities.
    pub fn total(&self, category: Category) -> u64 {
        self.rows.values().map(|c| c[category]).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_labels_round_trip() {
        for category in Category::ALL {
            assert_eq!(Category::from_label(category.label()), Some(category));
        }
        assert_eq!(Category::from_label("LTE"), None);
    }

    #[test]
    fn test_delta_from_is_signed() {
        let current = StationCounts::from_array([3, 0, 1, 5]);
        let baseline = StationCounts::from_array([5, 0, 0, 5]);
        let delta = current.delta_from(&baseline);
        assert_eq!(delta, CountDelta::from_array([-2, 0, 1, 0]));
    }

    #[test]
    fn test_fold_fills_missing_categories_with_zero() {
        let mut snapshot = Snapshot::new(UpdateToken::new("2024-01-01"));
        snapshot.fold(MunicipalityCount {
            prefecture: "愛媛県".into(),
            municipality: "松山市".into(),
            category: Category::Sub6,
            count: 4,
        });

        let row = snapshot.get("松山市").unwrap();
        assert_eq!(row[Category::Macro], 0);
        assert_eq!(row[Category::Sub6], 4);
        assert_eq!(snapshot.total(Category::Sub6), 4);
    }
}
