// src/pipeline/assemble.rs

//! Merge per-category series into one snapshot.

use crate::models::{CategorySeries, Snapshot, UpdateToken};

/// Outer-join `series` on municipality name.
///
/// Categories a municipality has no entry for are zero. Rows come out sorted
/// by name.
pub fn assemble(updated: UpdateToken, series: &[CategorySeries]) -> Snapshot {
    let mut snapshot = Snapshot::new(updated);
    for s in series {
        for record in s.records() {
            snapshot.fold(record);
        }
    }
    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Category;

    fn token() -> UpdateToken {
        UpdateToken::new("2024-03-01")
    }

    #[test]
    fn test_union_of_keys_zero_filled() {
        let series = [
            CategorySeries::new(Category::Macro, "愛媛県", token())
                .with("松山市", 10)
                .with("今治市", 4),
            CategorySeries::new(Category::Femto, "愛媛県", token()).with("松山市", 2),
            CategorySeries::new(Category::MilliWave, "愛媛県", token()).with("新居浜市", 1),
            CategorySeries::new(Category::Sub6, "愛媛県", token())
                .with("松山市", 3)
                .with("新居浜市", 2),
        ];

        let snapshot = assemble(token(), &series);
        assert_eq!(snapshot.len(), 3);

        let niihama = snapshot.get("新居浜市").unwrap();
        assert_eq!(niihama[Category::Macro], 0);
        assert_eq!(niihama[Category::Femto], 0);
        assert_eq!(niihama[Category::MilliWave], 1);
        assert_eq!(niihama[Category::Sub6], 2);

        let imabari = snapshot.get("今治市").unwrap();
        assert_eq!(imabari.iter().count(), 4);
        assert_eq!(imabari[Category::Sub6], 0);

        assert_eq!(snapshot.total(Category::Macro), 14);
    }

    #[test]
    fn test_rows_are_sorted_by_name() {
        let series = [
            CategorySeries::new(Category::Macro, "A県", token())
                .with("C", 1)
                .with("A", 1),
            CategorySeries::new(Category::Sub6, "A県", token()).with("B", 1),
        ];

        let snapshot = assemble(token(), &series);
        let names: Vec<&str> = snapshot.rows().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_empty_series() {
        let snapshot = assemble(token(), &[]);
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.updated, token());
    }
}
