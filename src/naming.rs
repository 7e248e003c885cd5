//! Container name generation.
//!
//! Names have the form `<action-name prefix>-<random suffix>`:
//!
//! - the prefix is the action name, with characters outside
//!   [`CONTAINER_NAME_VALID_CHARS`] replaced by `-`, cut to
//!   [`MAX_ACTION_NAME_PREFIX_LEN`] bytes
//! - the suffix is [`CONTAINER_NAME_SUFFIX_LEN`] random alphanumerics
//!
//! Every attempt gets a fresh suffix, so concurrent and retried attempts of
//! the same action never collide. The result always fits the engine's
//! [`MAX_CONTAINER_NAME_LEN`].

use crate::constants::{
    CONTAINER_NAME_SUFFIX_LEN, CONTAINER_NAME_VALID_CHARS, FALLBACK_ACTION_NAME,
    MAX_ACTION_NAME_PREFIX_LEN, MAX_CONTAINER_NAME_LEN,
};
use rand::Rng;
use rand::distributions::Alphanumeric;

/// Generates a fresh container name for an action attempt.
pub fn new_container_name(action_name: &str) -> String {
    let name = format!("{}-{}", name_prefix(action_name), random_suffix(CONTAINER_NAME_SUFFIX_LEN));
    debug_assert!(name.len() <= MAX_CONTAINER_NAME_LEN);
    name
}

/// Returns the deterministic part of a container name.
pub fn name_prefix(action_name: &str) -> String {
    let sanitized: String = action_name
        .chars()
        .map(|c| if CONTAINER_NAME_VALID_CHARS.contains(c) { c } else { '-' })
        .collect();

    if sanitized.is_empty() {
        return FALLBACK_ACTION_NAME.to_string();
    }
    truncate(&sanitized, MAX_ACTION_NAME_PREFIX_LEN).to_string()
}

/// Cuts `s` to at most `max_len` bytes.
fn truncate(s: &str, max_len: usize) -> &str {
    if s.len() <= max_len {
        return s;
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

fn random_suffix(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}
