//! List differ
//!
//! Decides which desired objects are new and which replace an existing
//! object with different fields. Objects only present on the cluster are
//! never reported; removal is up to the caller.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde_json::Value;

use pve_shared_types::{wire_string, ManagedObject};

/// Result of a list comparison. Entries are complete desired objects.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListDiff {
    pub to_create: Vec<ManagedObject>,
    pub to_update: Vec<ManagedObject>,
    /// Identifiers that appeared more than once in the desired list.
    pub duplicate_uids: Vec<String>,
}

impl ListDiff {
    pub fn is_empty(&self) -> bool {
        self.to_create.is_empty() && self.to_update.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Slot {
    Uid(String),
    Anonymous(usize),
}

/// Compare `desired` against `existing`, keyed by the `uid_field` value.
pub fn diff(
    existing: Option<&[ManagedObject]>,
    desired: &[ManagedObject],
    uid_field: &str,
    ignored: &[&str],
) -> ListDiff {
    diff_by(existing, desired, ignored, |object| {
        object.get(uid_field).and_then(wire_string)
    })
}

/// Same as [`diff`] with a caller supplied identifier, for resources keyed
/// by several fields.
pub fn diff_by<F>(
    existing: Option<&[ManagedObject]>,
    desired: &[ManagedObject],
    ignored: &[&str],
    key: F,
) -> ListDiff
where
    F: Fn(&ManagedObject) -> Option<String>,
{
    let mut result = ListDiff::default();

    // first occurrence keeps its position, the last one wins
    let mut wanted: IndexMap<Slot, ManagedObject> = IndexMap::new();
    for (index, object) in desired.iter().enumerate() {
        let object = normalize(object, ignored);
        let slot = match key(&object) {
            Some(uid) => Slot::Uid(uid),
            None => Slot::Anonymous(index),
        };

        if let (Some(_), Slot::Uid(uid)) = (wanted.insert(slot.clone(), object), &slot) {
            log::warn!("Duplicate identifier '{}' in desired list, last entry wins", uid);
            if !result.duplicate_uids.contains(uid) {
                result.duplicate_uids.push(uid.clone());
            }
        }
    }

    let current: HashMap<String, &ManagedObject> = existing
        .unwrap_or_default()
        .iter()
        .filter_map(|object| key(object).map(|uid| (uid, object)))
        .collect();

    for (slot, object) in wanted {
        let matching = match &slot {
            Slot::Uid(uid) => current.get(uid).copied(),
            Slot::Anonymous(_) => None,
        };

        match matching {
            None => result.to_create.push(object),
            Some(existing) if needs_update(existing, &object, ignored) => {
                result.to_update.push(object)
            }
            Some(_) => {}
        }
    }

    result
}

/// Desired object without null and ignored fields.
pub fn normalize(object: &ManagedObject, ignored: &[&str]) -> ManagedObject {
    object
        .iter()
        .filter(|(key, value)| !value.is_null() && !ignored.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// Two values are equal when they travel identically over the wire, so
/// `1`, `"1"` and `true` compare equal.
pub fn values_equal(left: &Value, right: &Value) -> bool {
    match (wire_string(left), wire_string(right)) {
        (Some(left), Some(right)) => left == right,
        _ => left == right,
    }
}

/// Full comparison: the desired object must carry exactly the compared
/// fields of the existing one.
fn needs_update(existing: &ManagedObject, desired: &ManagedObject, ignored: &[&str]) -> bool {
    let compared = |key: &str, value: &Value| !value.is_null() && !ignored.contains(&key);

    let introduces_field = desired
        .keys()
        .any(|key| existing.get(key).map_or(true, Value::is_null));
    if introduces_field {
        return true;
    }

    existing
        .iter()
        .filter(|(key, value)| compared(key, value))
        .any(|(key, value)| match desired.get(key) {
            Some(wanted) => !values_equal(value, wanted),
            None => true,
        })
}

/// Subset comparison: true if any desired field is missing from or
/// different in `existing`. Fields the caller left out are not compared.
pub fn differs_from(existing: &ManagedObject, desired: &ManagedObject, ignored: &[&str]) -> bool {
    desired
        .iter()
        .filter(|(key, value)| !value.is_null() && !ignored.contains(&key.as_str()))
        .any(|(key, value)| match existing.get(key) {
            Some(current) => !values_equal(current, value),
            None => true,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn objects(value: Value) -> Vec<ManagedObject> {
        value
            .as_array()
            .unwrap()
            .iter()
            .map(|item| item.as_object().cloned().unwrap())
            .collect()
    }

    fn groups() -> Vec<ManagedObject> {
        objects(json!([
            {"group": "ha0", "nodes": "pve1,pve2", "nofailback": 0, "restricted": 0, "digest": "aa"},
            {"group": "ha1", "nodes": "pve3", "nofailback": 1, "restricted": 0, "digest": "aa"}
        ]))
    }

    #[test]
    fn test_identical_lists_are_noop() {
        let existing = groups();
        let result = diff(Some(existing.as_slice()), &existing, "group", &[]);
        assert!(result.is_empty());
    }

    #[test]
    fn test_bootstrap() {
        let desired = objects(json!([{"group": "ha0", "nodes": "pve1", "comment": null}]));
        let stripped = objects(json!([{"group": "ha0", "nodes": "pve1"}]));

        let none = diff(None, &desired, "group", &[]);
        let empty = diff(Some(&[][..]), &desired, "group", &[]);

        assert_eq!(none, empty);
        assert_eq!(none.to_create, stripped);
        assert!(none.to_update.is_empty());
    }

    #[test]
    fn test_new_field_triggers_update() {
        let existing = objects(json!([{"group": "ha0", "nodes": "pve1"}]));
        let desired = objects(json!([{"group": "ha0", "nodes": "pve1", "comment": "db"}]));

        let result = diff(Some(existing.as_slice()), &desired, "group", &[]);
        assert!(result.to_create.is_empty());
        assert_eq!(result.to_update, desired);
    }

    #[test]
    fn test_omitted_field_triggers_update() {
        let existing = objects(json!([{"group": "ha0", "nodes": "pve1", "restricted": 1}]));
        let desired = objects(json!([{"group": "ha0", "nodes": "pve1"}]));

        let result = diff(Some(existing.as_slice()), &desired, "group", &[]);
        assert_eq!(result.to_update.len(), 1);
    }

    #[test]
    fn test_ignored_fields_never_compared() {
        let existing = groups();
        let desired = objects(json!([
            {"group": "ha0", "nodes": "pve1,pve2", "nofailback": 0, "restricted": 0, "digest": "bb"}
        ]));

        let result = diff(Some(existing.as_slice()), &desired, "group", &["digest"]);
        assert!(result.is_empty());
    }

    #[test]
    fn test_create_and_update_together() {
        let existing = groups();
        let desired = objects(json!([
            {"group": "ha2", "nodes": "pve1"},
            {"group": "ha0", "nodes": "pve1,pve2", "nofailback": 1, "restricted": 0}
        ]));

        let result = diff(Some(existing.as_slice()), &desired, "group", &["digest"]);
        assert_eq!(result.to_create[0]["group"], "ha2");
        assert_eq!(result.to_update[0]["group"], "ha0");
    }

    #[test]
    fn test_wire_equal_values() {
        let existing = objects(json!([{"group": "ha0", "nofailback": 1}]));
        let desired = objects(json!([{"group": "ha0", "nofailback": true}]));

        assert!(diff(Some(existing.as_slice()), &desired, "group", &[]).is_empty());
    }

    #[test]
    fn test_duplicate_uid_last_wins() {
        let desired = objects(json!([
            {"group": "ha0", "nodes": "pve1"},
            {"group": "ha1", "nodes": "pve2"},
            {"group": "ha0", "nodes": "pve3"}
        ]));

        let result = diff(None, &desired, "group", &[]);
        assert_eq!(result.to_create.len(), 2);
        assert_eq!(result.to_create[0]["nodes"], "pve3");
        assert_eq!(result.duplicate_uids, vec!["ha0".to_string()]);
    }

    #[test]
    fn test_missing_uid_is_created() {
        let existing = groups();
        let desired = objects(json!([{"nodes": "pve1"}, {"nodes": "pve1"}]));

        let result = diff(Some(existing.as_slice()), &desired, "group", &[]);
        assert_eq!(result.to_create.len(), 2);
        assert!(result.duplicate_uids.is_empty());
    }

    #[test]
    fn test_composite_key() {
        let existing = objects(json!([{"path": "/vms/100", "ugid": "a@pam"}]));
        let desired = objects(json!([{"path": "/vms/100", "ugid": "b@pam"}]));

        let result = diff_by(Some(existing.as_slice()), &desired, &[], |object| {
            Some(format!("{}:{}", object.get("path")?, object.get("ugid")?))
        });
        assert_eq!(result.to_create.len(), 1);
    }

    #[test]
    fn test_differs_from_is_subset_comparison() {
        let existing = json!({"rule": "r1", "type": "node-affinity", "nodes": "pve1", "comment": ""});
        let existing = existing.as_object().unwrap();

        let same = json!({"nodes": "pve1", "comment": null});
        assert!(!differs_from(existing, same.as_object().unwrap(), &[]));

        let changed = json!({"nodes": "pve2"});
        assert!(differs_from(existing, changed.as_object().unwrap(), &[]));

        let added = json!({"strict": 1});
        assert!(differs_from(existing, added.as_object().unwrap(), &[]));
        assert!(!differs_from(existing, added.as_object().unwrap(), &["strict"]));
    }
}
