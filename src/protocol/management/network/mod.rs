//! Shared directory maintaining the relation between controller NAMEs and
//! their claimed addresses. The directory is the single object shared
//! between claimers, the network manager and user connections; every
//! operation is atomic under an internal readers/writer lock.
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError, RwLock};

use crate::protocol::j1939::{ADDRESS_GLOBAL, ADDRESS_IDLE, ADDRESS_MAX_UNICAST, OnName};
use crate::protocol::management::name::Name;

#[derive(Default)]
struct Directory {
    /// NAME to claimed address, [`ADDRESS_IDLE`] when none is held.
    name_to_address: HashMap<Name, u8>,
    /// Claimed unicast address back to the owning NAME.
    address_to_name: HashMap<u8, Name>,
}

impl Directory {
    /// An address can be taken by `name` when it is unicast and either free
    /// or held by a lower-priority (numerically larger) NAME.
    fn claimable(&self, address: u8, name: Name) -> bool {
        if address > ADDRESS_MAX_UNICAST {
            return false;
        }
        match self.address_to_name.get(&address) {
            None => true,
            Some(holder) => name < *holder,
        }
    }
}

/// Storage class for maintaining the relation between controller NAME and
/// its address.
///
/// Two invariants hold across both directions of the mapping: at most one
/// NAME owns any given unicast address, and every registered NAME has
/// exactly one slot, either a unique unicast address or [`ADDRESS_IDLE`].
///
/// The new-name callback runs *with the write lock held*; it must not
/// re-enter the directory. Implementations that need to react should
/// snapshot the NAME and defer, e.g. through a channel send.
#[derive(Default)]
pub struct Network {
    directory: RwLock<Directory>,
    on_new_name: Mutex<Option<OnName>>,
}

impl Network {
    /// Empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the callback fired the first time a NAME is registered.
    pub fn set_on_new_name(&self, callback: OnName) {
        *self.on_new_name.lock().unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }

    fn notify_new_name(&self, name: Name) {
        let mut slot = self.on_new_name.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(callback) = slot.as_mut() {
            callback(name);
        }
    }

    /// ##################### Map access ##################### ///

    /// Register a NAME without an address. Returns `true` when the NAME was
    /// inserted, `false` when it was already known. The new-name callback
    /// fires on insertion only.
    pub fn try_emplace(&self, name: Name) -> bool {
        let mut directory = self.directory.write().unwrap_or_else(PoisonError::into_inner);
        if directory.name_to_address.contains_key(&name) {
            return false;
        }
        directory.name_to_address.insert(name, ADDRESS_IDLE);
        self.notify_new_name(name);
        true
    }

    /// Apply an observed (or local) address claim to the directory.
    ///
    /// The claim is treated as fact and arbitrated atomically:
    /// an unknown NAME is registered first; claiming the address already
    /// held is a no-op success; a non-claimable address parks the NAME at
    /// [`ADDRESS_IDLE`]; a free address binds; a contested address goes to
    /// the numerically lower NAME, evicting the loser to [`ADDRESS_IDLE`].
    ///
    /// Returns `false` only when the claim lost the arbitration.
    pub fn try_address_claim(&self, name: Name, address: u8) -> bool {
        let mut directory = self.directory.write().unwrap_or_else(PoisonError::into_inner);

        let mut inserted = false;
        match directory.name_to_address.get(&name).copied() {
            None => {
                directory.name_to_address.insert(name, ADDRESS_IDLE);
                inserted = true;
            }
            Some(current) if current == address => {
                // Re-claim of the address already held: nothing to change.
                return true;
            }
            Some(_) => {}
        }

        // Clear whatever slot this name held before.
        if let Some(previous) = directory.name_to_address.insert(name, ADDRESS_IDLE) {
            if previous <= ADDRESS_MAX_UNICAST && directory.address_to_name.get(&previous) == Some(&name) {
                directory.address_to_name.remove(&previous);
            }
        }

        let claimed = if address > ADDRESS_MAX_UNICAST {
            // Idle/global claims just park the name without an address.
            true
        } else {
            match directory.address_to_name.get(&address).copied() {
                None => {
                    directory.address_to_name.insert(address, name);
                    directory.name_to_address.insert(name, address);
                    true
                }
                Some(holder) if name < holder => {
                    // Lower NAME wins: evict the current holder.
                    directory.name_to_address.insert(holder, ADDRESS_IDLE);
                    directory.address_to_name.insert(address, name);
                    directory.name_to_address.insert(name, address);
                    true
                }
                Some(_) => false,
            }
        };

        if inserted {
            self.notify_new_name(name);
        }
        claimed
    }

    /// Release the address of the given NAME, keeping the NAME registered.
    /// Idempotent.
    pub fn release(&self, name: Name) {
        let mut directory = self.directory.write().unwrap_or_else(PoisonError::into_inner);
        let Some(address) = directory.name_to_address.get(&name).copied() else {
            return;
        };
        directory.name_to_address.insert(name, ADDRESS_IDLE);
        if directory.address_to_name.get(&address) == Some(&name) {
            directory.address_to_name.remove(&address);
        }
    }

    /// Remove a NAME and its address binding.
    pub fn erase_name(&self, name: Name) {
        let mut directory = self.directory.write().unwrap_or_else(PoisonError::into_inner);
        let Some(address) = directory.name_to_address.remove(&name) else {
            return;
        };
        if directory.address_to_name.get(&address) == Some(&name) {
            directory.address_to_name.remove(&address);
        }
    }

    /// Remove whichever NAME currently holds the given address.
    pub fn erase_address(&self, address: u8) {
        let mut directory = self.directory.write().unwrap_or_else(PoisonError::into_inner);
        let Some(name) = directory.address_to_name.remove(&address) else {
            return;
        };
        directory.name_to_address.remove(&name);
    }

    /// Clear all NAMEs and addresses.
    pub fn clear(&self) {
        let mut directory = self.directory.write().unwrap_or_else(PoisonError::into_inner);
        directory.name_to_address.clear();
        directory.address_to_name.clear();
    }

    /// ##################### Queries ##################### ///

    /// `true` iff the address is unicast and no NAME holds it.
    pub fn available(&self, address: u8) -> bool {
        if address > ADDRESS_MAX_UNICAST {
            return false;
        }
        let directory = self.directory.read().unwrap_or_else(PoisonError::into_inner);
        !directory.address_to_name.contains_key(&address)
    }

    /// `true` iff the address is unicast and either free or held by a
    /// lower-priority NAME that `name` could evict.
    pub fn claimable(&self, address: u8, name: Name) -> bool {
        let directory = self.directory.read().unwrap_or_else(PoisonError::into_inner);
        directory.claimable(address, name)
    }

    /// Search for an address this NAME may take.
    ///
    /// Self-configurable NAMEs scan `[preferred, 0xFE)` then wrap to
    /// `[0, preferred)`, returning the first free or evictable slot. A NAME
    /// with a fixed address gets its preferred address or nothing; other
    /// free addresses are deliberately not offered.
    ///
    /// Returns [`ADDRESS_GLOBAL`] when no address can be taken.
    pub fn find_address(&self, name: Name, preferred: u8) -> u8 {
        let preferred = preferred.min(ADDRESS_MAX_UNICAST);
        let directory = self.directory.read().unwrap_or_else(PoisonError::into_inner);

        if !name.self_config_address() {
            return if directory.claimable(preferred, name) { preferred } else { ADDRESS_GLOBAL };
        }

        for address in preferred..ADDRESS_IDLE {
            if directory.claimable(address, name) {
                return address;
            }
        }
        for address in 0..preferred {
            if directory.claimable(address, name) {
                return address;
            }
        }
        ADDRESS_GLOBAL
    }

    /// `true` when the NAME is registered, with or without an address.
    pub fn in_network(&self, name: Name) -> bool {
        let directory = self.directory.read().unwrap_or_else(PoisonError::into_inner);
        directory.name_to_address.contains_key(&name)
    }

    /// `true` when the NAME currently holds exactly this address.
    pub fn match_address(&self, name: Name, address: u8) -> bool {
        let directory = self.directory.read().unwrap_or_else(PoisonError::into_inner);
        directory.name_to_address.get(&name) == Some(&address)
    }

    /// Address held by the NAME, or [`ADDRESS_IDLE`] when it holds none or
    /// is not registered.
    pub fn get_address(&self, name: Name) -> u8 {
        let directory = self.directory.read().unwrap_or_else(PoisonError::into_inner);
        directory.name_to_address.get(&name).copied().unwrap_or(ADDRESS_IDLE)
    }

    /// NAME holding the given address, if any.
    pub fn get_name(&self, address: u8) -> Option<Name> {
        let directory = self.directory.read().unwrap_or_else(PoisonError::into_inner);
        directory.address_to_name.get(&address).copied()
    }

    /// Number of registered NAMEs.
    pub fn name_size(&self) -> usize {
        let directory = self.directory.read().unwrap_or_else(PoisonError::into_inner);
        directory.name_to_address.len()
    }

    /// Number of claimed addresses.
    pub fn address_size(&self) -> usize {
        let directory = self.directory.read().unwrap_or_else(PoisonError::into_inner);
        directory.address_to_name.len()
    }

    /// `true` once every unicast address is claimed and nothing is left to
    /// search.
    pub fn is_full(&self) -> bool {
        let directory = self.directory.read().unwrap_or_else(PoisonError::into_inner);
        directory.address_to_name.len() > ADDRESS_MAX_UNICAST as usize
    }

    /// Sorted snapshot of every registered NAME.
    pub fn names(&self) -> Vec<Name> {
        let directory = self.directory.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<Name> = directory.name_to_address.keys().copied().collect();
        names.sort_unstable();
        names
    }
}
