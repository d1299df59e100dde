//! Reference-counted named secrets shared between modules.
//!
//! A secret (typically an authentication cookie) is stored once under a name
//! and kept alive while any user holds a reference. The last release removes
//! it from the store.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;

/// Errors returned by [`PropertyStore`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PropertyError {
    #[error("property '{0}' not found")]
    NotFound(String),

    #[error("property '{0}' already exists")]
    AlreadyExists(String),
}

#[derive(Debug)]
struct Secret {
    refs: usize,
    bytes: Box<[u8]>,
}

/// Store of named, reference-counted secrets.
///
/// Cloning yields another handle onto the same store.
#[derive(Debug, Clone, Default)]
pub struct PropertyStore {
    entries: Arc<DashMap<String, Secret>>,
}

impl PropertyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `bytes` under `name` with one reference held by the caller.
    pub fn put(&self, name: &str, bytes: &[u8]) -> Result<(), PropertyError> {
        match self.entries.entry(name.to_string()) {
            Entry::Occupied(_) => Err(PropertyError::AlreadyExists(name.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(Secret {
                    refs: 1,
                    bytes: bytes.into(),
                });
                log::debug!("[Props] stored '{name}' ({} bytes)", bytes.len());
                Ok(())
            }
        }
    }

    /// Copies the secret into `buf`.
    ///
    /// # Panics
    ///
    /// Panics if `buf` is not exactly as long as the stored secret.
    pub fn get(&self, name: &str, buf: &mut [u8]) -> Result<(), PropertyError> {
        let secret = self
            .entries
            .get(name)
            .ok_or_else(|| PropertyError::NotFound(name.to_string()))?;
        assert_eq!(
            secret.bytes.len(),
            buf.len(),
            "length mismatch reading property '{name}'"
        );
        buf.copy_from_slice(&secret.bytes);
        Ok(())
    }

    /// Whether `name` is currently stored.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Current reference count of `name`, if stored.
    pub fn ref_count(&self, name: &str) -> Option<usize> {
        self.entries.get(name).map(|s| s.refs)
    }

    /// Adds a reference.
    ///
    /// # Panics
    ///
    /// Panics if `name` is not stored.
    pub fn ref_(&self, name: &str) {
        let mut secret = self
            .entries
            .get_mut(name)
            .unwrap_or_else(|| panic!("ref on missing property '{name}'"));
        secret.refs += 1;
    }

    /// Drops a reference, removing the secret when the count reaches zero.
    ///
    /// # Panics
    ///
    /// Panics if `name` is not stored.
    pub fn unref(&self, name: &str) {
        let removed = self.entries.remove_if_mut(name, |_, secret| {
            secret.refs -= 1;
            secret.refs == 0
        });
        if removed.is_some() {
            log::debug!("[Props] released '{name}'");
            return;
        }
        assert!(
            self.entries.contains_key(name),
            "unref on missing property '{name}'"
        );
    }

    /// Takes a reference that is released when the handle drops.
    pub fn acquire(&self, name: &str) -> Result<SecretHandle, PropertyError> {
        let mut secret = self
            .entries
            .get_mut(name)
            .ok_or_else(|| PropertyError::NotFound(name.to_string()))?;
        secret.refs += 1;
        Ok(SecretHandle {
            store: self.clone(),
            name: name.to_string(),
        })
    }
}

/// A held reference on a stored secret.
#[derive(Debug)]
pub struct SecretHandle {
    store: PropertyStore,
    name: String,
}

impl SecretHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Copies the secret into `buf`. Same length contract as [`PropertyStore::get`].
    pub fn read(&self, buf: &mut [u8]) -> Result<(), PropertyError> {
        self.store.get(&self.name, buf)
    }
}

impl Drop for SecretHandle {
    fn drop(&mut self) {
        self.store.unref(&self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_copies_the_secret() {
        let store = PropertyStore::new();
        store.put("cookie", &[1, 2, 3, 4]).unwrap();

        let mut buf = [0u8; 4];
        store.get("cookie", &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);
    }

    #[test]
    fn second_put_is_rejected() {
        let store = PropertyStore::new();
        store.put("cookie", b"a").unwrap();
        assert_eq!(
            store.put("cookie", b"b"),
            Err(PropertyError::AlreadyExists("cookie".into()))
        );
    }

    #[test]
    fn get_of_unknown_name_fails() {
        let store = PropertyStore::new();
        let mut buf = [0u8; 1];
        assert_eq!(
            store.get("nope", &mut buf),
            Err(PropertyError::NotFound("nope".into()))
        );
    }

    #[test]
    #[should_panic(expected = "length mismatch")]
    fn get_with_wrong_length_is_a_fault() {
        let store = PropertyStore::new();
        store.put("cookie", &[0; 16]).unwrap();
        let mut buf = [0u8; 8];
        let _ = store.get("cookie", &mut buf);
    }

    #[test]
    fn last_unref_removes_the_secret() {
        let store = PropertyStore::new();
        store.put("cookie", b"x").unwrap();
        store.ref_("cookie");
        assert_eq!(store.ref_count("cookie"), Some(2));

        store.unref("cookie");
        assert!(store.contains("cookie"));
        store.unref("cookie");
        assert!(!store.contains("cookie"));
    }

    #[test]
    fn handle_releases_on_drop() {
        let store = PropertyStore::new();
        store.put("cookie", b"xy").unwrap();
        {
            let handle = store.acquire("cookie").unwrap();
            let mut buf = [0u8; 2];
            handle.read(&mut buf).unwrap();
            assert_eq!(&buf, b"xy");
            assert_eq!(store.ref_count("cookie"), Some(2));
        }
        assert_eq!(store.ref_count("cookie"), Some(1));
    }

    #[test]
    #[should_panic(expected = "missing property")]
    fn unref_of_unknown_name_is_a_fault() {
        PropertyStore::new().unref("ghost");
    }
}
