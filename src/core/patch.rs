// src/core/patch.rs
//! Reference patch application over `snapshot.data`
//!
//! - `set` writes the value, creating missing intermediate objects
//! - `merge` shallow-merges an object into an object (or absent) target
//!
//! Applying never mutates the input snapshot; a new snapshot is returned
//! with `meta.version` bumped and the frozen context stamped into `meta`.

use crate::core::types::{Patch, PatchOp, Snapshot};
use crate::core::CoreError;
use crate::runtime::frozen::HostContext;
use serde_json::{Map, Value};

/// Apply patches in order, producing a new snapshot
pub fn apply_patches(
    snapshot: &Snapshot,
    patches: &[Patch],
    ctx: &HostContext,
) -> Result<Snapshot, CoreError> {
    let mut data = snapshot.data.clone();
    for patch in patches {
        apply_one(&mut data, patch)?;
    }

    let mut next = snapshot.clone();
    next.data = data;
    stamp(&mut next, ctx);
    Ok(next)
}

/// Advance `meta` for a new snapshot version
pub(crate) fn stamp(snapshot: &mut Snapshot, ctx: &HostContext) {
    snapshot.meta.version += 1;
    snapshot.meta.timestamp = ctx.now;
    snapshot.meta.random_seed = ctx.random_seed.clone();
}

fn apply_one(data: &mut Value, patch: &Patch) -> Result<(), CoreError> {
    let segments: Vec<&str> = patch.path.split('.').collect();
    if patch.path.is_empty() || segments.iter().any(|s| s.is_empty()) {
        return Err(CoreError::InvalidPatch {
            path: patch.path.clone(),
            reason: "path must be a non-empty dot-separated key list".to_string(),
        });
    }

    let (last, parents) = segments
        .split_last()
        .ok_or_else(|| CoreError::InvalidPatch {
            path: patch.path.clone(),
            reason: "empty path".to_string(),
        })?;

    let mut node = data;
    for segment in parents {
        let object = as_object(node, patch)?;
        node = object
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    let parent = as_object(node, patch)?;

    match patch.op {
        PatchOp::Set => {
            parent.insert(last.to_string(), patch.value.clone());
        }
        PatchOp::Merge => {
            let incoming = patch.value.as_object().ok_or_else(|| CoreError::InvalidPatch {
                path: patch.path.clone(),
                reason: "merge value must be an object".to_string(),
            })?;
            let target = parent
                .entry(last.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            let target = target.as_object_mut().ok_or_else(|| CoreError::InvalidPatch {
                path: patch.path.clone(),
                reason: "merge target is not an object".to_string(),
            })?;
            for (k, v) in incoming {
                target.insert(k.clone(), v.clone());
            }
        }
    }
    Ok(())
}

fn as_object<'a>(node: &'a mut Value, patch: &Patch) -> Result<&'a mut Map<String, Value>, CoreError> {
    if node.is_null() {
        *node = Value::Object(Map::new());
    }
    node.as_object_mut().ok_or_else(|| CoreError::InvalidPatch {
        path: patch.path.clone(),
        reason: "traverses a non-object value".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> HostContext {
        HostContext {
            now: 1_700_000_000_000,
            random_seed: "seed-1".to_string(),
        }
    }

    #[test]
    fn test_set_creates_intermediate_objects() {
        let base = Snapshot::genesis("h");
        let next = apply_patches(
            &base,
            &[Patch::set("user.profile.name", json!("ada"))],
            &ctx(),
        )
        .unwrap();

        assert_eq!(next.get("user.profile.name"), Some(&json!("ada")));
        assert_eq!(next.meta.version, 1);
        assert_eq!(next.meta.timestamp, 1_700_000_000_000);
        assert_eq!(next.meta.random_seed, "seed-1");
        // Input untouched
        assert_eq!(base.data, json!({}));
    }

    #[test]
    fn test_merge_is_shallow() {
        let base = Snapshot::genesis("h").with_data(json!({
            "settings": { "theme": "dark", "nested": { "a": 1 } }
        }));
        let next = apply_patches(
            &base,
            &[Patch::merge("settings", json!({ "lang": "en", "nested": { "b": 2 } }))],
            &ctx(),
        )
        .unwrap();

        assert_eq!(
            next.data,
            json!({ "settings": { "theme": "dark", "lang": "en", "nested": { "b": 2 } } })
        );
    }

    #[test]
    fn test_merge_rejects_non_object_value() {
        let base = Snapshot::genesis("h");
        let err = apply_patches(&base, &[Patch::merge("settings", json!(3))], &ctx())
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidPatch { .. }));
    }

    #[test]
    fn test_traversing_scalar_fails_atomically() {
        let base = Snapshot::genesis("h").with_data(json!({ "count": 1 }));
        let result = apply_patches(
            &base,
            &[
                Patch::set("ok", json!(true)),
                Patch::set("count.inner", json!(2)),
            ],
            &ctx(),
        );

        assert!(result.is_err());
        assert_eq!(base.data, json!({ "count": 1 }));
        assert_eq!(base.meta.version, 0);
    }

    #[test]
    fn test_empty_segment_rejected() {
        let base = Snapshot::genesis("h");
        assert!(apply_patches(&base, &[Patch::set("a..b", json!(1))], &ctx()).is_err());
        assert!(apply_patches(&base, &[Patch::set("", json!(1))], &ctx()).is_err());
    }
}
