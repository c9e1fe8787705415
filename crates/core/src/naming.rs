//! Deterministic, cluster-safe resource names.

use sha2::{Digest, Sha256};

/// Longest name accepted for a cluster object.
pub const MAX_NAME_LEN: usize = 63;

const HASH_SUFFIX_LEN: usize = 8;

/// Turns an arbitrary string into an RFC-1123 label.
///
/// Lowercases, replaces anything outside `[a-z0-9-]` with `-`, collapses runs of
/// dashes and trims them from both ends. Names that still exceed
/// [`MAX_NAME_LEN`] are truncated and suffixed with a short digest of the
/// original input, so two long inputs sharing a prefix never collide.
pub fn sanitize_name(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last_dash = true;

    for c in input.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            out.push(c);
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }

    while out.ends_with('-') {
        out.pop();
    }

    if out.len() <= MAX_NAME_LEN {
        return out;
    }

    let digest = hex::encode(Sha256::digest(input.as_bytes()));
    let keep = MAX_NAME_LEN - HASH_SUFFIX_LEN - 1;
    let mut truncated = out[..keep].trim_end_matches('-').to_string();
    truncated.push('-');
    truncated.push_str(&digest[..HASH_SUFFIX_LEN]);
    truncated
}

/// Name of a stack derived from an explicit name or the directory that
/// declares it.
pub fn stack_name(explicit: Option<&str>, dir: &std::path::Path) -> String {
    if let Some(name) = explicit.filter(|n| !n.trim().is_empty()) {
        return sanitize_name(name);
    }

    let basename = dir
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("deckhand");
    let name = sanitize_name(basename);
    if name.is_empty() {
        "deckhand".to_string()
    } else {
        name
    }
}

/// Upper-case environment-variable fragment for a name (`my-api` -> `MY_API`).
pub fn env_fragment(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}
