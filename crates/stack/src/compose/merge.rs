//! Layering of several compose documents.
//!
//! A later document is merged into the earlier one before anything is
//! converted. Services and volumes merge by name. Within a service:
//!
//! * `environment`, `labels`, `annotations` and `depends_on` merge by key,
//! * `ports`, `expose` and `env_file` are appended, skipping duplicates,
//! * `volumes` merge by mount target,
//! * `build`, `deploy` and `healthcheck` merge field by field,
//! * every other field is replaced.

use serde_yaml::{Mapping, Value};

pub(crate) fn merge_documents(base: &mut Value, overlay: Value) {
    let Value::Mapping(overlay) = overlay else {
        if !overlay.is_null() {
            *base = overlay;
        }
        return;
    };
    let Some(base) = ensure_mapping(base) else { return };

    for (key, value) in overlay {
        let merge_entry: Option<fn(&mut Value, Value)> = match key.as_str() {
            Some("services") => Some(merge_service),
            Some("volumes") => Some(merge_mappings),
            _ => None,
        };
        match merge_entry {
            Some(merge_entry) => merge_named(base, key, value, merge_entry),
            None => {
                base.insert(key, value);
            }
        }
    }
}

fn ensure_mapping(value: &mut Value) -> Option<&mut Mapping> {
    if !value.is_mapping() {
        *value = Value::Mapping(Mapping::new());
    }
    value.as_mapping_mut()
}

fn merge_named(base: &mut Mapping, key: Value, overlay: Value, merge_entry: fn(&mut Value, Value)) {
    let Value::Mapping(entries) = overlay else {
        base.insert(key, overlay);
        return;
    };
    if !base.contains_key(&key) {
        base.insert(key.clone(), Value::Mapping(Mapping::new()));
    }
    let Some(target) = base.get_mut(&key).and_then(ensure_mapping) else { return };

    for (name, entry) in entries {
        match target.get_mut(&name) {
            Some(existing) => merge_entry(existing, entry),
            None => {
                target.insert(name, entry);
            }
        }
    }
}

fn merge_service(base: &mut Value, overlay: Value) {
    let Value::Mapping(overlay) = overlay else { return };
    let Some(base) = ensure_mapping(base) else { return };

    for (key, value) in overlay {
        let field = key.as_str().unwrap_or_default().to_string();
        if !base.contains_key(&key) {
            base.insert(key, value);
            continue;
        }
        let Some(existing) = base.get_mut(&key) else { continue };
        match field.as_str() {
            "environment" | "labels" | "annotations" => merge_keyed(existing, value, pair_entries),
            "depends_on" => merge_keyed(existing, value, dependency_entries),
            "ports" | "expose" | "env_file" => append_unique(existing, value),
            "volumes" => merge_mounts(existing, value),
            "build" | "deploy" | "healthcheck" => merge_mappings(existing, value),
            _ => *existing = value,
        }
    }
}

/// Recursive merge; anything that is not a mapping on both sides is replaced.
fn merge_mappings(base: &mut Value, overlay: Value) {
    match (base.as_mapping_mut(), overlay) {
        (_, Value::Null) => {}
        (Some(base), Value::Mapping(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_mappings(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (_, overlay) => *base = overlay,
    }
}

/// `K=V` lists and plain mappings, as one mapping.
fn pair_entries(value: Value) -> Mapping {
    match value {
        Value::Mapping(map) => map,
        Value::Sequence(items) => items
            .into_iter()
            .filter_map(|item| {
                let text = item.as_str()?.to_string();
                Some(match text.split_once('=') {
                    Some((k, v)) => (Value::from(k), Value::from(v)),
                    None => (Value::from(text), Value::Null),
                })
            })
            .collect(),
        _ => Mapping::new(),
    }
}

/// The short list form becomes entries without a condition.
fn dependency_entries(value: Value) -> Mapping {
    match value {
        Value::Mapping(map) => map,
        Value::Sequence(items) => items
            .into_iter()
            .filter(Value::is_string)
            .map(|name| (name, Value::Null))
            .collect(),
        _ => Mapping::new(),
    }
}

fn merge_keyed(base: &mut Value, overlay: Value, entries: fn(Value) -> Mapping) {
    let mut merged = entries(std::mem::take(base));
    merged.extend(entries(overlay));
    *base = Value::Mapping(merged);
}

fn into_sequence(value: Value) -> Vec<Value> {
    match value {
        Value::Sequence(items) => items,
        Value::Null => Vec::new(),
        other => vec![other],
    }
}

fn append_unique(base: &mut Value, overlay: Value) {
    let mut items = into_sequence(std::mem::take(base));
    for item in into_sequence(overlay) {
        if !items.contains(&item) {
            items.push(item);
        }
    }
    *base = Value::Sequence(items);
}

fn mount_target(mount: &Value) -> Option<&str> {
    match mount {
        Value::String(text) => {
            let mut parts = text.split(':');
            let first = parts.next();
            parts.next().or(first)
        }
        Value::Mapping(map) => map.get("target").and_then(Value::as_str),
        _ => None,
    }
}

/// An overlay mount replaces the base mount with the same target.
fn merge_mounts(base: &mut Value, overlay: Value) {
    let mut mounts = into_sequence(std::mem::take(base));
    for mount in into_sequence(overlay) {
        let position = mount_target(&mount)
            .and_then(|target| mounts.iter().position(|m| mount_target(m) == Some(target)));
        match position {
            Some(index) => mounts[index] = mount,
            None => mounts.push(mount),
        }
    }
    *base = Value::Sequence(mounts);
}
