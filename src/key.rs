//! Cache key naming and the marker traits for keys and values

use serde::{Serialize, de::DeserializeOwned};
use std::fmt::Display;

/// Trait for types that can be cached
pub trait Cacheable: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}
impl<T> Cacheable for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

/// Trait for business key types
pub trait CacheKey: Display + Send + Sync + 'static {}
impl<T> CacheKey for T where T: Display + ?Sized + Send + Sync + 'static {}

/// Separator between the line name and the business key.
pub const NAMESPACE_SEPARATOR: char = '&';

/// Build the namespaced key for `key` in the cache line `line_name`.
///
/// Whitespace is stripped from the key's string form, so `"a b"` and `"ab"`
/// name the same entry. Every process computes the same key for the same
/// input, which is what lets invalidation messages match across processes.
pub fn namespaced_key(line_name: &str, key: &(impl Display + ?Sized)) -> String {
    let raw = key.to_string();
    let mut out = String::with_capacity(line_name.len() + 1 + raw.len());
    out.push_str(line_name);
    out.push(NAMESPACE_SEPARATOR);
    out.extend(raw.chars().filter(|c| !c.is_whitespace()));
    out
}

/// True when the business-key part of a namespaced key is empty.
pub(crate) fn is_blank_key(key: &(impl Display + ?Sized)) -> bool {
    key.to_string().chars().all(char::is_whitespace)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespaced_key() {
        assert_eq!(namespaced_key("orders", "42"), "orders&42");
        assert_eq!(namespaced_key("orders", &42_u64), "orders&42");

        // Whitespace of any kind is removed from the business key only
        assert_eq!(namespaced_key("orders", " 4\t2\n"), "orders&42");
        assert_eq!(namespaced_key("my orders", "4 2"), "my orders&42");

        // Deterministic
        assert_eq!(
            namespaced_key("users", "alice@example.com"),
            namespaced_key("users", "alice@example.com")
        );
        assert_ne!(namespaced_key("users", "1"), namespaced_key("orders", "1"));
    }

    #[test]
    fn test_is_blank_key() {
        assert!(is_blank_key(""));
        assert!(is_blank_key("  \t"));
        assert!(!is_blank_key(" x "));
        assert!(!is_blank_key(&0));
    }
}
