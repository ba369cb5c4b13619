//! Lenient JSON extraction from LLM responses.
//!
//! Models wrap JSON in prose, markdown fences, or both. The rule here is
//! deliberately forgiving: scan the text for top-level balanced `{…}`
//! blocks (string- and escape-aware) and return the first one that
//! deserializes into the requested artifact type. Fences need no special
//! handling since backticks are not braces.

use serde::de::DeserializeOwned;

/// Parse the first balanced JSON object in `text` that matches `T`.
///
/// Returns `None` when no balanced block deserializes, which callers
/// treat as "the response is prose, not an artifact".
pub fn first_json<T: DeserializeOwned>(text: &str) -> Option<T> {
    for candidate in balanced_objects(text) {
        if let Ok(parsed) = serde_json::from_str::<T>(candidate) {
            return Some(parsed);
        }
    }
    None
}

/// All non-overlapping top-level balanced `{…}` blocks, left to right.
///
/// Braces inside JSON strings are ignored; a block whose closing brace
/// never arrives is dropped.
fn balanced_objects(text: &str) -> Vec<&str> {
    let mut blocks = Vec::new();
    let bytes = text.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'{' {
            i = i.saturating_add(1);
            continue;
        }

        match balanced_end(bytes, i) {
            Some(end) => {
                if let Some(block) = text.get(i..end) {
                    blocks.push(block);
                }
                i = end;
            }
            // Unterminated block: nothing after this point can close it.
            None => break,
        }
    }

    blocks
}

/// Find the exclusive end index of the balanced object opening at `start`.
fn balanced_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth: usize = 0;
    let mut in_string = false;
    let mut escaped = false;
    let mut i = start;

    while i < bytes.len() {
        let b = bytes[i];
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
        } else {
            match b {
                b'"' => in_string = true,
                b'{' => depth = depth.saturating_add(1),
                b'}' => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        return Some(i.saturating_add(1));
                    }
                }
                _ => {}
            }
        }
        i = i.saturating_add(1);
    }

    None
}
