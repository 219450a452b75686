use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Variables resolved for one environment (and optionally one service).
///
/// Names are unique and iteration follows the order the variables were
/// received in. The set is read-only once built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnvironmentVariableSet(IndexMap<String, String>);

impl EnvironmentVariableSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// A repeated name keeps its first position and takes the last value.
impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for EnvironmentVariableSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = IndexMap::new();
        for (k, v) in iter {
            map.insert(k.into(), v.into());
        }
        Self(map)
    }
}

impl<'a> IntoIterator for &'a EnvironmentVariableSet {
    type Item = (&'a String, &'a String);
    type IntoIter = indexmap::map::Iter<'a, String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
