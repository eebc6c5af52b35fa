//! Diff engine: pure comparison of two snapshots
//!
//! No I/O and no clock; the same pair of snapshots always yields the same
//! plan.

use super::types::{DiffPlan, Snapshot};

/// Compute the operations that make `target` match `source`
///
/// Directory placeholders take part in existence checks only. Content is
/// compared with [`ObjectMeta::same_content`](crate::store::ObjectMeta::same_content).
pub fn diff(source: &Snapshot, target: &Snapshot) -> DiffPlan {
    let mut plan = DiffPlan {
        source_bucket: source.bucket().to_string(),
        target_bucket: target.bucket().to_string(),
        ..Default::default()
    };

    for (key, source_meta) in source.iter() {
        match target.get(key.as_str()) {
            None => {
                plan.to_copy.insert(key.clone());
                plan.source_meta.insert(key.clone(), source_meta.clone());
            }
            Some(_) if key.is_directory_marker() => {}
            Some(target_meta) if !source_meta.same_content(target_meta) => {
                plan.to_update.insert(key.clone());
                plan.source_meta.insert(key.clone(), source_meta.clone());
            }
            Some(_) => {}
        }
    }

    plan.to_delete_candidates = target
        .keys()
        .filter(|key| !source.contains(key.as_str()))
        .cloned()
        .collect();

    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ObjectMeta;
    use crate::sync::ObjectKey;
    use std::collections::BTreeSet;

    fn obj(key: &str, etag: Option<&str>, size: u64, ts: u64) -> ObjectMeta {
        ObjectMeta {
            key: key.to_string(),
            etag: etag.map(String::from),
            size,
            last_modified_ms: ts,
        }
    }

    fn keys(items: &[&str]) -> BTreeSet<ObjectKey> {
        items.iter().map(|k| ObjectKey::from(*k)).collect()
    }

    #[test]
    fn test_copy_and_delete_candidates() {
        let source = Snapshot::from_objects(
            "src",
            vec![obj("a.txt", Some("h1"), 1, 0), obj("b.txt", Some("h2"), 1, 0)],
        );
        let target = Snapshot::from_objects(
            "dst",
            vec![obj("b.txt", Some("h2"), 1, 0), obj("c.txt", Some("h3"), 1, 0)],
        );

        let plan = diff(&source, &target);
        assert_eq!(plan.to_copy, keys(&["a.txt"]));
        assert!(plan.to_update.is_empty());
        assert_eq!(plan.to_delete_candidates, keys(&["c.txt"]));
        assert_eq!(plan.source_bucket, "src");
        assert_eq!(plan.target_bucket, "dst");
        assert!(plan.source_meta.contains_key("a.txt"));
    }

    #[test]
    fn test_changed_etag_is_update() {
        let source = Snapshot::from_objects("s", vec![obj("a.txt", Some("h1"), 1, 0)]);
        let target = Snapshot::from_objects("t", vec![obj("a.txt", Some("h2"), 1, 0)]);

        let plan = diff(&source, &target);
        assert_eq!(plan.to_update, keys(&["a.txt"]));
        assert!(plan.to_copy.is_empty());
        assert!(plan.to_delete_candidates.is_empty());
    }

    #[test]
    fn test_fallback_comparison_without_etags() {
        let source = Snapshot::from_objects(
            "s",
            vec![obj("same", None, 5, 100), obj("resized", None, 6, 100), obj("touched", None, 5, 200)],
        );
        let target = Snapshot::from_objects(
            "t",
            vec![obj("same", None, 5, 100), obj("resized", None, 5, 100), obj("touched", None, 5, 100)],
        );

        let plan = diff(&source, &target);
        assert_eq!(plan.to_update, keys(&["resized", "touched"]));
    }

    #[test]
    fn test_directory_markers_never_updated() {
        let source = Snapshot::from_objects("s", vec![obj("docs/", None, 0, 1), obj("new/", None, 0, 1)]);
        let target = Snapshot::from_objects("t", vec![obj("docs/", None, 0, 999), obj("old/", None, 0, 1)]);

        let plan = diff(&source, &target);
        assert!(plan.to_update.is_empty());
        assert_eq!(plan.to_copy, keys(&["new/"]));
        assert_eq!(plan.to_delete_candidates, keys(&["old/"]));
    }

    #[test]
    fn test_identical_snapshots_give_empty_plan() {
        let objects = vec![obj("a", Some("h"), 1, 0), obj("b/", None, 0, 0)];
        let plan = diff(
            &Snapshot::from_objects("s", objects.clone()),
            &Snapshot::from_objects("t", objects),
        );
        assert!(plan.is_empty());
        assert_eq!(plan.transfer_count(), 0);
    }

    #[test]
    fn test_sets_are_disjoint_and_cover_changes() {
        let source = Snapshot::from_objects(
            "s",
            (0..50).map(|i| obj(&format!("k{}", i), Some(&format!("h{}", i % 7)), 1, 0)),
        );
        let target = Snapshot::from_objects(
            "t",
            (25..75).map(|i| obj(&format!("k{}", i), Some(&format!("h{}", i % 5)), 1, 0)),
        );

        let plan = diff(&source, &target);
        assert!(plan.to_copy.is_disjoint(&plan.to_update));
        assert!(plan.to_copy.is_disjoint(&plan.to_delete_candidates));
        assert!(plan.to_update.is_disjoint(&plan.to_delete_candidates));

        assert_eq!(plan.to_copy.len(), 25);
        assert_eq!(plan.to_delete_candidates.len(), 25);
        for key in source.keys().filter(|k| target.contains(k.as_str())) {
            let changed = !source.get(key.as_str()).unwrap().same_content(target.get(key.as_str()).unwrap());
            assert_eq!(plan.to_update.contains(key), changed, "key {}", key);
        }
        assert_eq!(plan.source_meta.len(), plan.transfer_count());
    }
}
