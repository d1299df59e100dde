//! Ordered RTSP header list.

/// Header list that keeps insertion order and unique, case-sensitive keys.
///
/// Receivers in the field are picky about header order on the handshake
/// requests, so `put` on an existing key replaces the value in place rather
/// than moving it to the end.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderList {
    entries: Vec<(String, String)>,
}

impl HeaderList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key` to `value`, keeping the original position if present.
    pub fn put(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, v)) => *v = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Removes `key`, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        let pos = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(pos).1)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for HeaderList {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut list = Self::new();
        for (k, v) in iter {
            list.put(k, v);
        }
        list
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_replaces_in_place() {
        let mut list = HeaderList::new();
        list.put("Client-Instance", "a");
        list.put("Apple-Challenge", "b");
        list.put("Client-Instance", "c");

        let keys: Vec<_> = list.iter().collect();
        assert_eq!(keys, vec![("Client-Instance", "c"), ("Apple-Challenge", "b")]);
    }

    #[test]
    fn keys_are_case_sensitive() {
        let mut list = HeaderList::new();
        list.put("Session", "1");
        list.put("session", "2");
        assert_eq!(list.len(), 2);
        assert_eq!(list.get("Session"), Some("1"));
        assert_eq!(list.get("SESSION"), None);
    }

    #[test]
    fn remove_returns_the_value() {
        let mut list: HeaderList = [("A", "1"), ("B", "2")].into_iter().collect();
        assert_eq!(list.remove("A").as_deref(), Some("1"));
        assert_eq!(list.remove("A"), None);
        assert!(!list.contains("A"));
        assert_eq!(list.len(), 1);
    }
}
