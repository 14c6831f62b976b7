//! Cache keys.
//!
//! A [`CacheKey`] is a namespace prefix, a version and an ordered list of
//! [`KeyPart`]s. It prints as `prefix:vN:k1=v1&k2=v2`, leaving out an empty
//! prefix and a zero version:
//!
//! ```
//! use stockroom_core::{CacheKey, KeyPart};
//!
//! let key = CacheKey::new("storefront", 1, vec![KeyPart::new("handle", Some("shirt"))]);
//! assert_eq!(key.to_string(), "storefront:v1:handle=shirt");
//!
//! let key = CacheKey::new("", 0, vec![KeyPart::new("flag", None::<&str>)]);
//! assert_eq!(key.to_string(), "flag");
//! ```
//!
//! Storefront queries are keyed by query text and variables:
//!
//! ```
//! use serde_json::json;
//! use stockroom_core::CacheKey;
//!
//! let key = CacheKey::from_query("ProductQuery", &json!({"handle": "shirt"}));
//! assert_eq!(key.to_string(), r#"query=ProductQuery&variables={"handle":"shirt"}"#);
//! ```

use smol_str::SmolStr;
use std::fmt;
use std::mem::size_of;
use std::sync::Arc;

/// Strings up to this length live inline in a `SmolStr`.
const INLINE_CAP: usize = 23;

#[derive(Debug, PartialEq, Eq, Hash)]
struct KeyData {
    prefix: SmolStr,
    version: u32,
    parts: Vec<KeyPart>,
}

/// Identifies one cacheable operation.
///
/// Cloning shares the underlying data. Two keys are equal when prefix,
/// version and parts are equal, in order.
///
/// ```
/// use stockroom_core::{CacheKey, KeyPart};
///
/// let key = CacheKey::new(
///     "storefront",
///     2,
///     vec![
///         KeyPart::new("query", Some("CollectionQuery")),
///         KeyPart::new("handle", Some("summer")),
///     ],
/// );
/// assert_eq!(key.prefix(), "storefront");
/// assert_eq!(key.version(), 2);
/// assert_eq!(key.parts().count(), 2);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey(Arc<KeyData>);

impl CacheKey {
    /// Builds a key from its components.
    pub fn new(prefix: impl Into<SmolStr>, version: u32, parts: Vec<KeyPart>) -> Self {
        CacheKey(Arc::new(KeyData {
            prefix: prefix.into(),
            version,
            parts,
        }))
    }

    /// Builds the key for a storefront query.
    ///
    /// `variables` is rendered as compact JSON with object keys sorted at
    /// every level, so `{"a":1,"b":2}` and `{"b":2,"a":1}` give the same
    /// key. Array order is kept. `null` means the query takes none.
    pub fn from_query(query: &str, variables: &serde_json::Value) -> Self {
        let mut parts = vec![KeyPart::new("query", Some(query))];
        if !variables.is_null() {
            parts.push(KeyPart::new("variables", Some(sorted(variables).to_string())));
        }
        Self::new("", 0, parts)
    }

    /// Builds an unprefixed, unversioned key from `(name, value)` pairs.
    pub fn from_slice(parts: &[(&str, Option<&str>)]) -> Self {
        let parts = parts
            .iter()
            .map(|&(name, value)| KeyPart::new(name, value))
            .collect();
        Self::new("", 0, parts)
    }

    /// The parts, in order.
    pub fn parts(&self) -> impl Iterator<Item = &KeyPart> {
        self.0.parts.iter()
    }

    /// The version.
    pub fn version(&self) -> u32 {
        self.0.version
    }

    /// The namespace prefix.
    pub fn prefix(&self) -> &str {
        &self.0.prefix
    }

    /// Approximate heap and inline bytes held by this key.
    ///
    /// Used to weigh entries in size-bounded stores.
    pub fn memory_size(&self) -> usize {
        let spilled = |s: &str| s.len().saturating_sub(INLINE_CAP);
        let strings: usize = spilled(&self.0.prefix)
            + self
                .parts()
                .map(|p| spilled(p.key()) + p.value().map_or(0, spilled))
                .sum::<usize>();

        // Arc header, the shared data and the parts buffer.
        2 * size_of::<usize>()
            + size_of::<KeyData>()
            + self.0.parts.len() * size_of::<KeyPart>()
            + strings
    }
}

fn sorted(value: &serde_json::Value) -> serde_json::Value {
    use serde_json::Value;

    match value {
        Value::Object(fields) => {
            let mut fields: Vec<_> = fields.iter().collect();
            fields.sort_unstable_by(|(a, _), (b, _)| a.cmp(b));
            Value::Object(
                fields
                    .into_iter()
                    .map(|(name, field)| (name.clone(), sorted(field)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
        other => other.clone(),
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let KeyData {
            prefix,
            version,
            parts,
        } = &*self.0;
        if !prefix.is_empty() {
            write!(f, "{prefix}:")?;
        }
        if *version > 0 {
            write!(f, "v{version}:")?;
        }
        let mut separator = "";
        for part in parts {
            write!(f, "{separator}{part}")?;
            separator = "&";
        }
        Ok(())
    }
}

/// An opaque string key becomes a single key-only part.
impl From<&str> for CacheKey {
    fn from(key: &str) -> Self {
        Self::new("", 0, vec![KeyPart::new(key, None::<&str>)])
    }
}

impl From<String> for CacheKey {
    fn from(key: String) -> Self {
        Self::from(key.as_str())
    }
}

/// One `name` or `name=value` component of a [`CacheKey`].
///
/// ```
/// use stockroom_core::KeyPart;
///
/// let part = KeyPart::new("first", Some("12"));
/// assert_eq!(part.key(), "first");
/// assert_eq!(part.value(), Some("12"));
/// assert_eq!(part.to_string(), "first=12");
/// ```
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct KeyPart {
    key: SmolStr,
    value: Option<SmolStr>,
}

impl KeyPart {
    /// Builds a part; pass `None` for a key-only part.
    pub fn new<K: AsRef<str>, V: AsRef<str>>(key: K, value: Option<V>) -> Self {
        KeyPart {
            key: SmolStr::new(key),
            value: value.map(SmolStr::new),
        }
    }

    /// The name.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The value, if any.
    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }
}

impl fmt::Display for KeyPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(value) => write!(f, "{}={value}", self.key),
            None => f.write_str(&self.key),
        }
    }
}
