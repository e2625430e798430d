//! Query execution over loaded documents

use std::cmp::Ordering;

use super::document::{Document, ID_FIELD};
use crate::engine::query::{compare_values, Filter, FindOptions, SortDirection};

/// Filter, sort, skip and limit `docs`. Without an explicit order the
/// input order (ascending id) is kept.
pub fn execute(docs: Vec<Document>, opts: &FindOptions) -> Vec<Document> {
    let mut results: Vec<Document> = docs
        .into_iter()
        .filter(|doc| matches(doc, &opts.filter))
        .collect();

    if !opts.order_by.is_empty() {
        results.sort_by(|a, b| {
            for order in &opts.order_by {
                let ordering = compare_field(a, b, &order.column);
                let ordering = match order.direction {
                    SortDirection::Asc => ordering,
                    SortDirection::Desc => ordering.reverse(),
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });
    }

    let skipped = results.into_iter().skip(opts.skip as usize);
    match opts.limit {
        Some(n) => skipped.take(n as usize).collect(),
        None => skipped.collect(),
    }
}

pub fn matches(doc: &Document, filter: &Filter) -> bool {
    if filter.is_empty() {
        return true;
    }
    filter.matches(&doc.to_fields())
}

fn compare_field(a: &Document, b: &Document, field: &str) -> Ordering {
    if field == ID_FIELD {
        return a.id.cmp(&b.id);
    }
    match (a.get(field), b.get(field)) {
        (Some(a), Some(b)) => compare_values(a, b).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::query::OrderBy;
    use serde_json::json;

    fn people() -> Vec<Document> {
        [("Alice", 30), ("Bob", 25), ("Charlie", 35)]
            .iter()
            .enumerate()
            .map(|(i, (name, age))| {
                Document::with_id(i as u32 + 1, json!({"name": name, "age": age}).as_object().unwrap().clone())
            })
            .collect()
    }

    #[test]
    fn test_filter_by_id_and_field() {
        let opts = FindOptions::new().filter(Filter::new().eq("_id", 2));
        let results = execute(people(), &opts);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].get("name"), Some(&json!("Bob")));

        let opts = FindOptions::new().filter(Filter::new().gte("age", 30));
        assert_eq!(execute(people(), &opts).len(), 2);
    }

    #[test]
    fn test_sort_skip_limit() {
        let opts = FindOptions::new().order_by(OrderBy::desc("age")).skip(1).limit(1);
        let results = execute(people(), &opts);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].get("name"), Some(&json!("Alice")));
    }
}
