//! Engine-owned labels and annotations.
//!
//! Everything the engine creates carries [`DEPLOYED_BY`]; reconciliation and
//! destroy only ever touch objects that have it.

use std::collections::BTreeMap;

pub const DEPLOYED_BY: &str = "deckhand.dev/deployed-by";
pub const STACK_NAME: &str = "stack.deckhand.dev/name";
pub const STACK_SERVICE: &str = "stack.deckhand.dev/service";
pub const STACK_VOLUME: &str = "stack.deckhand.dev/volume";
pub const STACK_ENDPOINT: &str = "stack.deckhand.dev/endpoint";

pub const POLICY_ANNOTATION: &str = "deckhand.dev/policy";
pub const POLICY_KEEP: &str = "keep";
pub const GENERATE_HOST_ANNOTATION: &str = "deckhand.dev/generate-host";

pub type Labels = BTreeMap<String, String>;

pub fn owner(owner: &str) -> Labels {
    Labels::from([(DEPLOYED_BY.to_string(), owner.to_string())])
}

/// Selects the pods of one service. Never includes user labels, so editing
/// them does not orphan running pods.
pub fn selector(stack: &str, service: &str) -> Labels {
    Labels::from([
        (STACK_NAME.to_string(), stack.to_string()),
        (STACK_SERVICE.to_string(), service.to_string()),
    ])
}

pub fn service(owner_name: &str, stack: &str, service: &str) -> Labels {
    let mut labels = owner(owner_name);
    labels.extend(selector(stack, service));
    labels
}

pub fn volume(owner_name: &str, stack: &str, volume: &str) -> Labels {
    let mut labels = owner(owner_name);
    labels.insert(STACK_NAME.to_string(), stack.to_string());
    labels.insert(STACK_VOLUME.to_string(), volume.to_string());
    labels
}

pub fn endpoint(owner_name: &str, stack: &str, endpoint: &str) -> Labels {
    let mut labels = owner(owner_name);
    labels.insert(STACK_NAME.to_string(), stack.to_string());
    labels.insert(STACK_ENDPOINT.to_string(), endpoint.to_string());
    labels
}

/// User labels never override engine-owned keys.
pub fn merge_user(mut engine: Labels, user: &Labels) -> Labels {
    for (key, value) in user {
        engine.entry(key.clone()).or_insert_with(|| value.clone());
    }
    engine
}

pub fn is_kept(annotations: &Labels) -> bool {
    annotations
        .get(POLICY_ANNOTATION)
        .map(|v| v == POLICY_KEEP)
        .unwrap_or(false)
}
