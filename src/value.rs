//! Value envelopes stored by backends and reported by the facade

use serde::{Deserialize, Serialize};

/// What a backend persists for a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum CachedValue<V> {
    /// An explicitly cached null result
    Null,
    /// A real business value
    Value(V),
}

impl<V> From<CachedValue<V>> for Lookup<V> {
    fn from(value: CachedValue<V>) -> Self {
        match value {
            CachedValue::Null => Lookup::Null,
            CachedValue::Value(v) => Lookup::Present(v),
        }
    }
}

/// Result of looking a key up across a cache line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<V> {
    /// No backend holds the key
    Absent,
    /// A backend holds an explicitly cached null
    Null,
    /// A backend holds a value
    Present(V),
}

impl<V> Lookup<V> {
    /// True for `Null` and `Present`, i.e. the loader need not run.
    pub fn is_hit(&self) -> bool {
        !matches!(self, Lookup::Absent)
    }

    pub fn into_option(self) -> Option<V> {
        match self {
            Lookup::Present(v) => Some(v),
            Lookup::Absent | Lookup::Null => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cached_value_json_shape() {
        let null: CachedValue<u32> = CachedValue::Null;
        let value = CachedValue::Value(7_u32);

        assert_eq!(serde_json::to_string(&null).unwrap(), r#"{"kind":"null"}"#);
        assert_eq!(
            serde_json::to_string(&value).unwrap(),
            r#"{"kind":"value","value":7}"#
        );

        let parsed: CachedValue<u32> = serde_json::from_str(r#"{"kind":"null"}"#).unwrap();
        assert_eq!(parsed, CachedValue::Null);
    }

    #[test]
    fn test_lookup_from_cached_value() {
        assert_eq!(Lookup::from(CachedValue::<u8>::Null), Lookup::Null);
        assert_eq!(Lookup::from(CachedValue::Value(1_u8)), Lookup::Present(1));
        assert!(Lookup::<u8>::Null.is_hit());
        assert!(!Lookup::<u8>::Absent.is_hit());
        assert_eq!(Lookup::<u8>::Null.into_option(), None);
    }
}
