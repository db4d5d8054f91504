use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Hash whatever `f` writes into a fresh hasher.
pub fn stable_hash_with(f: impl FnOnce(&mut DefaultHasher)) -> u64 {
    let mut hasher = DefaultHasher::new();
    f(&mut hasher);
    hasher.finish()
}

/// Order-sensitive digest over a sequence of strings (callers sort first).
pub fn stable_hash_strs<'a, I>(values: I) -> u64
where
    I: IntoIterator<Item = &'a str>,
{
    stable_hash_with(|hasher| {
        for value in values {
            value.hash(hasher);
        }
    })
}

/// Render a digest as fixed-width lowercase hex.
pub fn hex_digest(value: u64) -> String {
    format!("{value:016x}")
}
