//! Registry of discovered renderers.
//!
//! Each entry ties a device identity (its UDN) to the per-device module the
//! host loaded for it and to the discovery proxy that announced it. The
//! registry is owned by the discovery thread's owner context and is never
//! shared.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::host::{ModuleHost, ModuleIndex};
use crate::sink::DeviceProxy;

/// Identity of a device: its UDN.
pub type DeviceId = String;

/// Errors returned by [`DeviceRegistry`] mutations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("device {0} is already registered")]
    DuplicateIdentity(DeviceId),
}

/// A registered device.
pub struct ManagedDevice {
    pub identity: DeviceId,
    /// Module loaded for this device; unloading it tears the session down.
    pub session: ModuleIndex,
    pub proxy: Arc<dyn DeviceProxy>,
}

impl ManagedDevice {
    pub fn new(proxy: Arc<dyn DeviceProxy>, session: ModuleIndex) -> Self {
        Self {
            identity: proxy.udn().to_string(),
            session,
            proxy,
        }
    }
}

impl fmt::Debug for ManagedDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedDevice")
            .field("identity", &self.identity)
            .field("session", &self.session)
            .field("name", &self.proxy.friendly_name())
            .finish()
    }
}

/// Owned map of managed devices keyed by identity.
pub struct DeviceRegistry {
    host: Arc<dyn ModuleHost>,
    devices: HashMap<DeviceId, ManagedDevice>,
}

impl DeviceRegistry {
    pub fn new(host: Arc<dyn ModuleHost>) -> Self {
        Self {
            host,
            devices: HashMap::new(),
        }
    }

    /// Registers a device. A second device with the same identity is
    /// rejected and the existing entry is kept.
    pub fn add(&mut self, device: ManagedDevice) -> Result<(), RegistryError> {
        if self.devices.contains_key(&device.identity) {
            return Err(RegistryError::DuplicateIdentity(device.identity));
        }
        log::debug!(
            "[Registry] added {} (module {})",
            device.identity,
            device.session
        );
        self.devices.insert(device.identity.clone(), device);
        Ok(())
    }

    /// Removes a device and requests teardown of its session.
    ///
    /// Removing an unknown identity is a no-op. Returns the session whose
    /// teardown was requested, if any.
    pub fn remove(&mut self, identity: &str) -> Option<ModuleIndex> {
        let session = self.devices.get(identity)?.session;

        // Teardown first, then the proxy, then the entry itself.
        self.host.unload_request(session);
        log::debug!("[Registry] {identity} removed (module {session})");
        let ManagedDevice { proxy, .. } = self.devices.remove(identity)?;
        drop(proxy);
        Some(session)
    }

    pub fn get(&self, identity: &str) -> Option<&ManagedDevice> {
        self.devices.get(identity)
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.devices.contains_key(identity)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Snapshot of the current identities, sorted.
    ///
    /// The snapshot is detached from the registry, so it stays valid while
    /// entries are removed.
    pub fn identities(&self) -> Vec<DeviceId> {
        let mut ids: Vec<_> = self.devices.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Calls `f` for every device present when the call started.
    pub fn for_each(&mut self, mut f: impl FnMut(&mut Self, &DeviceId)) {
        for id in self.identities() {
            f(self, &id);
        }
    }

    /// Removes every device, requesting teardown of each session.
    ///
    /// Returns the number of devices torn down.
    pub fn drain_all(&mut self) -> usize {
        let mut count = 0;
        self.for_each(|registry, id| {
            if registry.remove(id).is_some() {
                count += 1;
            }
        });
        count
    }
}

impl fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceRegistry")
            .field("devices", &self.identities())
            .finish()
    }
}
