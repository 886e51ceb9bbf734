//! Frequency and deduplication helpers shared by the report builders.

use std::collections::HashMap;

use crate::store::Record;

/// Count records per key, sorted by descending count.
///
/// Ties keep the order in which each key first appeared, so the output is
/// fully determined by the input order.
pub fn count_by<F>(records: &[Record], key: F) -> Vec<(&'static str, usize)>
where
    F: Fn(&Record) -> &'static str,
{
    let mut counts: Vec<(&'static str, usize)> = Vec::new();
    let mut index: HashMap<&'static str, usize> = HashMap::new();

    for record in records {
        let k = key(record);
        match index.get(k) {
            Some(&i) => counts[i].1 += 1,
            None => {
                index.insert(k, counts.len());
                counts.push((k, 1));
            }
        }
    }

    // Stable sort preserves first-appearance order among equal counts.
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts
}

/// Case-folded, trimmed summary used as the dedup key.
pub fn summary_key(record: &Record) -> String {
    record.summary.trim().to_lowercase()
}

/// Keep the first record for each non-empty summary key, dropping records
/// whose summary is blank.
pub fn dedup_by_summary<'a, I>(records: I) -> Vec<&'a Record>
where
    I: IntoIterator<Item = &'a Record>,
{
    let mut seen = std::collections::HashSet::new();
    records
        .into_iter()
        .filter(|r| {
            let key = summary_key(r);
            !key.is_empty() && seen.insert(key)
        })
        .collect()
}


#[cfg(test)]
mod tests {
    use super::test_support::record;
    use super::*;
    use crate::classify::{Category, Urgency};

    #[test]
    fn counts_sorted_descending() {
        let records = vec![
            record(1, Category::Finance, Urgency::Low),
            record(2, Category::Sales, Urgency::Low),
            record(3, Category::Sales, Urgency::High),
        ];
        let counts = count_by(&records, |r| r.category.as_str());
        assert_eq!(counts, vec![("sales", 2), ("finance", 1)]);
    }

    #[test]
    fn ties_keep_first_appearance() {
        let records = vec![
            record(1, Category::Hr, Urgency::Medium),
            record(2, Category::Product, Urgency::Low),
            record(3, Category::Product, Urgency::High),
            record(4, Category::Hr, Urgency::Low),
        ];
        let counts = count_by(&records, |r| r.category.as_str());
        assert_eq!(counts, vec![("hr", 2), ("product", 2)]);

        let urgency = count_by(&records, |r| r.urgency.as_str());
        assert_eq!(urgency, vec![("low", 2), ("medium", 1), ("high", 1)]);
    }

    #[test]
    fn empty_input_gives_empty_table() {
        assert!(count_by(&[], |r| r.category.as_str()).is_empty());
    }

    #[test]
    fn dedup_keeps_earliest_and_drops_blank() {
        let mut a = record(1, Category::Sales, Urgency::Low);
        a.summary = "Call the supplier".into();
        let mut b = record(2, Category::Sales, Urgency::Low);
        b.summary = "  call the SUPPLIER ".into();
        let mut c = record(3, Category::Sales, Urgency::Low);
        c.summary = "   ".into();
        let d = record(4, Category::Sales, Urgency::Low);

        let records = vec![a, b, c, d];
        let ids: Vec<i64> = dedup_by_summary(&records).iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 4]);
    }
}
