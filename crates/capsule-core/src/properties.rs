//! Property values and case-insensitive property maps.
//!
//! Services and the framework carry metadata as [`Properties`]: a map whose
//! keys compare case-insensitively (`Service.Ranking` and `service.ranking`
//! are the same key) while remembering the spelling used on insertion.
//! Values are [`PropertyValue`]s, which deserialize untagged so that
//! framework properties can be written naturally in configuration files:
//!
//! ```toml
//! [framework.properties]
//! "app.name" = "demo"
//! "app.workers" = 4
//! "app.tags" = ["a", "b"]
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Keys the framework assigns to every service registration.
pub mod keys {
    /// Unique numeric id of a registration (immutable).
    pub const SERVICE_ID: &str = "service.id";
    /// Ranking used to order lookups, highest first (immutable after
    /// registration, defaults to `0`).
    pub const SERVICE_RANKING: &str = "service.ranking";
    /// The type names the service was registered under (immutable).
    pub const OBJECTCLASS: &str = "objectclass";
    /// Id of the plugin that registered the service (immutable).
    pub const SERVICE_PLUGIN_ID: &str = "service.plugin.id";

    /// Version of the running framework.
    pub const FRAMEWORK_VERSION: &str = "capsule.framework.version";
    /// Vendor string of the running framework.
    pub const FRAMEWORK_VENDOR: &str = "capsule.framework.vendor";
    /// Base directory for plugin storage.
    pub const FRAMEWORK_STORAGE: &str = "capsule.framework.storage";

    /// Returns `true` if `key` is owned by the framework and cannot be
    /// changed through `set_properties`.
    pub fn is_framework_owned(key: &str) -> bool {
        [SERVICE_ID, SERVICE_RANKING, OBJECTCLASS, SERVICE_PLUGIN_ID]
            .iter()
            .any(|k| k.eq_ignore_ascii_case(key))
    }
}

// =============================================================================
// PropertyValue
// =============================================================================

/// A single property value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    /// Boolean value.
    Bool(bool),
    /// Signed integer value.
    Int(i64),
    /// Floating-point value.
    Float(f64),
    /// String value.
    String(String),
    /// List of values; filters match a list if any element matches.
    List(Vec<PropertyValue>),
}

impl PropertyValue {
    /// Returns the string slice for [`PropertyValue::String`].
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer for [`PropertyValue::Int`], or a string that
    /// parses as one.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            Self::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Returns the value as a float for numeric variants.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(n) => Some(*n as f64),
            Self::Float(f) => Some(*f),
            Self::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Returns the boolean for [`PropertyValue::Bool`].
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the elements for [`PropertyValue::List`].
    pub fn as_list(&self) -> Option<&[PropertyValue]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::String(s) => f.write_str(s),
            Self::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for PropertyValue {
    fn from(v: i32) -> Self {
        Self::Int(v.into())
    }
}

impl From<u32> for PropertyValue {
    fn from(v: u32) -> Self {
        Self::Int(v.into())
    }
}

impl From<u64> for PropertyValue {
    fn from(v: u64) -> Self {
        // Ids never get near i64::MAX; saturate rather than wrap.
        Self::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl<T: Into<PropertyValue>> From<Vec<T>> for PropertyValue {
    fn from(v: Vec<T>) -> Self {
        Self::List(v.into_iter().map(Into::into).collect())
    }
}

// =============================================================================
// Properties
// =============================================================================

/// A property map with case-insensitive keys.
///
/// # Example
///
/// ```
/// use capsule_core::Properties;
///
/// let props = Properties::new()
///     .with("Name", "foo")
///     .with("age", 5);
///
/// assert_eq!(props.get("name").and_then(|v| v.as_str()), Some("foo"));
/// assert_eq!(props.keys().collect::<Vec<_>>(), vec!["Name", "age"]);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(
    from = "BTreeMap<String, PropertyValue>",
    into = "BTreeMap<String, PropertyValue>"
)]
pub struct Properties {
    /// Lowercased key → (original key, value).
    entries: HashMap<String, (String, PropertyValue)>,
    /// Original keys in insertion order, for stable iteration.
    order: Vec<String>,
}

impl Properties {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a value (builder pattern).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Inserts a value, returning the previous value for the key.
    ///
    /// If the key already exists under a different spelling, the new
    /// spelling replaces the old one.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<PropertyValue>,
    ) -> Option<PropertyValue> {
        let key = key.into();
        let folded = key.to_lowercase();
        let previous = self.entries.insert(folded.clone(), (key.clone(), value.into()));
        match previous {
            Some((_, old_value)) => {
                if let Some(slot) = self.order.iter_mut().find(|k| k.to_lowercase() == folded) {
                    *slot = key;
                }
                Some(old_value)
            }
            None => {
                self.order.push(key);
                None
            }
        }
    }

    /// Looks up a value case-insensitively.
    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.entries.get(&key.to_lowercase()).map(|(_, v)| v)
    }

    /// Removes a value case-insensitively.
    pub fn remove(&mut self, key: &str) -> Option<PropertyValue> {
        let folded = key.to_lowercase();
        let (_, value) = self.entries.remove(&folded)?;
        self.order.retain(|k| k.to_lowercase() != folded);
        Some(value)
    }

    /// Returns `true` if the key is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(&key.to_lowercase())
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the map is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys in insertion order, with their original spelling.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropertyValue)> {
        self.order.iter().filter_map(|k| {
            self.entries
                .get(&k.to_lowercase())
                .map(|(key, value)| (key.as_str(), value))
        })
    }

    /// Copies every entry of `other` into `self`, overwriting on collision.
    pub fn extend_from(&mut self, other: &Properties) {
        for (key, value) in other.iter() {
            self.insert(key, value.clone());
        }
    }
}

impl<K, V> FromIterator<(K, V)> for Properties
where
    K: Into<String>,
    V: Into<PropertyValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut props = Properties::new();
        for (key, value) in iter {
            props.insert(key, value);
        }
        props
    }
}

impl From<BTreeMap<String, PropertyValue>> for Properties {
    fn from(map: BTreeMap<String, PropertyValue>) -> Self {
        map.into_iter().collect()
    }
}

impl From<Properties> for BTreeMap<String, PropertyValue> {
    fn from(props: Properties) -> Self {
        props
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_insensitive_lookup() {
        let props = Properties::new().with("Service.Ranking", 10);
        assert_eq!(props.get("service.ranking"), Some(&PropertyValue::Int(10)));
        assert!(props.contains_key("SERVICE.RANKING"));
    }

    #[test]
    fn test_insert_replaces_spelling() {
        let mut props = Properties::new().with("name", "a");
        let previous = props.insert("NAME", "b");
        assert_eq!(previous, Some(PropertyValue::from("a")));
        assert_eq!(props.len(), 1);
        assert_eq!(props.keys().collect::<Vec<_>>(), vec!["NAME"]);
    }

    #[test]
    fn test_remove_keeps_order() {
        let mut props = Properties::new().with("a", 1).with("b", 2).with("c", 3);
        assert_eq!(props.remove("B"), Some(PropertyValue::Int(2)));
        assert_eq!(props.keys().collect::<Vec<_>>(), vec!["a", "c"]);
        assert_eq!(props.remove("b"), None);
    }

    #[test]
    fn test_untagged_deserialize() {
        let props: Properties =
            serde_json::from_str(r#"{"name": "foo", "age": 5, "ratio": 0.5, "on": true, "tags": ["x", 1]}"#)
                .unwrap();
        assert_eq!(props.get("name"), Some(&PropertyValue::from("foo")));
        assert_eq!(props.get("age"), Some(&PropertyValue::Int(5)));
        assert_eq!(props.get("ratio"), Some(&PropertyValue::Float(0.5)));
        assert_eq!(props.get("on"), Some(&PropertyValue::Bool(true)));
        assert_eq!(
            props.get("tags"),
            Some(&PropertyValue::List(vec!["x".into(), 1.into()]))
        );
    }

    #[test]
    fn test_framework_owned_keys() {
        assert!(keys::is_framework_owned("Service.ID"));
        assert!(keys::is_framework_owned("objectClass"));
        assert!(!keys::is_framework_owned("service.description"));
    }

    #[test]
    fn test_value_display() {
        let v = PropertyValue::from(vec!["a", "b"]);
        assert_eq!(v.to_string(), "[a, b]");
        assert_eq!(PropertyValue::from(2.5).to_string(), "2.5");
    }
}
