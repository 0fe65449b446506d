// packages/engine/src/state/document.rs
//! Mirror document helpers
//!
//! The mirror is a plain `serde_json::Value`. Deltas are applied with a
//! recursive override merge: objects merge key by key, every other value from
//! the delta replaces what the mirror holds at that path. There are no removal
//! semantics, so a field deleted server-side stays in the mirror until the
//! next full snapshot. That staleness is accepted.

use serde_json::Value;

/// Merge `delta` into `target`, incoming values win
pub fn override_merge(target: &mut Value, delta: &Value) {
    match (target, delta) {
        (Value::Object(target), Value::Object(delta)) => {
            for (key, incoming) in delta {
                match target.get_mut(key) {
                    Some(existing) => override_merge(existing, incoming),
                    None => {
                        target.insert(key.clone(), incoming.clone());
                    }
                }
            }
        }
        (target, delta) => *target = delta.clone(),
    }
}

/// Resolve a dot-delimited path. Numeric segments index into arrays.
pub fn resolve<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(root);
    }

    path.split('.').try_fold(root, |node, segment| match node {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Visit every field path of `delta` depth-first, parents before children.
///
/// Arrays are leaves; their elements are not visited individually.
pub fn walk_paths<F>(delta: &Value, visit: &mut F)
where
    F: FnMut(&str),
{
    if let Value::Object(map) = delta {
        let mut prefix = String::new();
        walk_object(map, &mut prefix, visit);
    }
}

fn walk_object<F>(map: &serde_json::Map<String, Value>, prefix: &mut String, visit: &mut F)
where
    F: FnMut(&str),
{
    for (key, value) in map {
        let restore = prefix.len();
        if !prefix.is_empty() {
            prefix.push('.');
        }
        prefix.push_str(key);

        visit(prefix.as_str());
        if let Value::Object(child) = value {
            walk_object(child, prefix, visit);
        }

        prefix.truncate(restore);
    }
}
