//! Exclusive-open admission control for scarce resources.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::debug;

use crate::error_handling::types::ResourceError;

/// Proof of an exclusive reservation on one resource key.
///
/// The token makes release idempotent and stale-safe: a handle from an earlier opener never
/// releases a later opener's reservation on the same key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateHandle {
    key: String,
    token: u64,
}

impl GateHandle {
    pub fn key(&self) -> &str {
        &self.key
    }
}

struct Slot<R> {
    token: u64,
    resource: Option<Arc<R>>,
}

/// Keyed table of exclusively opened resources.
///
/// A key is first reserved with [`ResourceGate::try_acquire_exclusive`], which fails with
/// [`ResourceError::AlreadyOpen`] if anyone holds it; the (possibly slow) open then happens
/// outside the gate and the result is attached with [`ResourceGate::install`].
pub struct ResourceGate<R> {
    slots: Mutex<HashMap<String, Slot<R>>>,
    next_token: AtomicU64,
}

impl<R> Default for ResourceGate<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> ResourceGate<R> {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(1),
        }
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, Slot<R>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn try_acquire_exclusive(&self, key: &str) -> Result<GateHandle, ResourceError> {
        let mut slots = self.slots();
        if slots.contains_key(key) {
            return Err(ResourceError::AlreadyOpen(key.to_string()));
        }

        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        slots.insert(
            key.to_string(),
            Slot {
                token,
                resource: None,
            },
        );
        debug!("Reserved resource {} (token {})", key, token);
        Ok(GateHandle {
            key: key.to_string(),
            token,
        })
    }

    /// Attaches the opened resource to a live reservation.
    pub fn install(&self, handle: &GateHandle, resource: R) -> Result<Arc<R>, ResourceError> {
        let mut slots = self.slots();
        match slots.get_mut(&handle.key) {
            Some(slot) if slot.token == handle.token => {
                let resource = Arc::new(resource);
                slot.resource = Some(Arc::clone(&resource));
                Ok(resource)
            }
            _ => Err(ResourceError::NotOpen(handle.key.clone())),
        }
    }

    /// The installed resource for `key`; a bare reservation yields `None`.
    pub fn get(&self, key: &str) -> Option<Arc<R>> {
        self.slots()
            .get(key)
            .and_then(|slot| slot.resource.as_ref().map(Arc::clone))
    }

    pub fn handle_for(&self, key: &str) -> Option<GateHandle> {
        self.slots().get(key).map(|slot| GateHandle {
            key: key.to_string(),
            token: slot.token,
        })
    }

    /// Releases a reservation. Returns the resource if this call released it; repeated or
    /// stale releases are no-ops returning `None`.
    pub fn release(&self, handle: &GateHandle) -> Option<Arc<R>> {
        let mut slots = self.slots();
        let matches = slots
            .get(&handle.key)
            .map(|slot| slot.token == handle.token)
            .unwrap_or(false);
        if !matches {
            return None;
        }
        debug!("Released resource {} (token {})", handle.key, handle.token);
        slots.remove(&handle.key).and_then(|slot| slot.resource)
    }

    pub fn is_open(&self, key: &str) -> bool {
        self.slots().contains_key(key)
    }

    /// Installed resources, sorted by key.
    pub fn open_entries(&self) -> Vec<(String, Arc<R>)> {
        let mut entries: Vec<(String, Arc<R>)> = self
            .slots()
            .iter()
            .filter_map(|(key, slot)| {
                slot.resource
                    .as_ref()
                    .map(|resource| (key.clone(), Arc::clone(resource)))
            })
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn second_opener_gets_already_open() {
        let gate: ResourceGate<&str> = ResourceGate::new();

        let handle = gate.try_acquire_exclusive("COM3").unwrap();
        gate.install(&handle, "port").unwrap();

        assert_eq!(
            gate.try_acquire_exclusive("COM3"),
            Err(ResourceError::AlreadyOpen("COM3".to_string()))
        );
        assert!(gate.try_acquire_exclusive("COM4").is_ok());
    }

    #[test]
    fn reservation_blocks_before_install() {
        let gate: ResourceGate<&str> = ResourceGate::new();
        let _handle = gate.try_acquire_exclusive("COM3").unwrap();

        assert!(gate.is_open("COM3"));
        assert!(gate.get("COM3").is_none());
        assert!(gate.try_acquire_exclusive("COM3").is_err());
    }

    #[test]
    fn release_is_idempotent() {
        let gate: ResourceGate<u8> = ResourceGate::new();
        let handle = gate.try_acquire_exclusive("COM3").unwrap();
        gate.install(&handle, 7).unwrap();

        assert_eq!(gate.release(&handle).as_deref(), Some(&7));
        assert_eq!(gate.release(&handle), None);
        assert!(!gate.is_open("COM3"));
    }

    #[test]
    fn stale_handle_cannot_release_new_opener() {
        let gate: ResourceGate<u8> = ResourceGate::new();
        let old = gate.try_acquire_exclusive("COM3").unwrap();
        gate.release(&old);

        let current = gate.try_acquire_exclusive("COM3").unwrap();
        gate.install(&current, 1).unwrap();

        assert_eq!(gate.release(&old), None);
        assert!(gate.is_open("COM3"));
        assert!(gate.install(&old, 2).is_err());
    }

    #[test]
    fn concurrent_openers_admit_exactly_one() {
        let gate: Arc<ResourceGate<()>> = Arc::new(ResourceGate::new());

        let winners: usize = (0..16)
            .map(|_| {
                let gate = Arc::clone(&gate);
                thread::spawn(move || gate.try_acquire_exclusive("/dev/ttyUSB0").is_ok())
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|t| t.join().unwrap() as usize)
            .sum();

        assert_eq!(winners, 1);
    }

    #[test]
    fn open_entries_are_sorted_and_skip_reservations() {
        let gate: ResourceGate<u8> = ResourceGate::new();
        let b = gate.try_acquire_exclusive("b").unwrap();
        gate.install(&b, 2).unwrap();
        let a = gate.try_acquire_exclusive("a").unwrap();
        gate.install(&a, 1).unwrap();
        let _c = gate.try_acquire_exclusive("c").unwrap();

        let keys: Vec<String> = gate.open_entries().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "b"]);
    }
}
