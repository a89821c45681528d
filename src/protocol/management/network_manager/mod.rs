//! Fan-out of claim and request frames over a set of claimers. One manager
//! watches the bus for a whole process: it keeps the directory current,
//! announces controllers it has never seen, and routes each frame to the
//! claimer(s) it concerns.
use std::collections::HashMap;
use std::sync::Arc;

use crate::protocol::j1939::{ADDRESS_IDLE, OnAddress};
use crate::protocol::management::address_claimer::{AddressClaimer, ClaimerHandle};
use crate::protocol::management::name::Name;
use crate::protocol::management::network::Network;
use crate::protocol::transport::frame::Frame;

/// Thin dispatcher over a map of claimer handles keyed by NAME.
pub struct NetworkManager {
    network: Arc<Network>,
    claimers: HashMap<Name, ClaimerHandle>,
    on_new_controller: Option<OnAddress>,
}

impl NetworkManager {
    /// Manager over the given directory, with no claimers registered yet.
    pub fn new(network: Arc<Network>) -> Self {
        Self {
            network,
            claimers: HashMap::new(),
            on_new_controller: None,
        }
    }

    /// Set the callback fired when a controller unknown to the directory
    /// claims for the first time.
    pub fn set_on_new_controller(&mut self, callback: OnAddress) {
        self.on_new_controller = Some(callback);
    }

    /// Register a claimer for event routing.
    pub fn insert(&mut self, claimer: &AddressClaimer) {
        self.claimers.insert(claimer.name(), claimer.handle());
    }

    /// Remove the claimer registered for `name`.
    pub fn remove(&mut self, name: Name) {
        self.claimers.remove(&name);
    }

    /// Number of claimers being managed.
    pub fn len(&self) -> usize {
        self.claimers.len()
    }

    /// `true` when no claimer is registered.
    pub fn is_empty(&self) -> bool {
        self.claimers.is_empty()
    }

    /// Directory this manager feeds.
    pub fn network(&self) -> &Arc<Network> {
        &self.network
    }

    /// Process address claim and address request frames, turning them into
    /// events for the claimer(s) they are addressed to. Other frames are
    /// ignored.
    pub fn process(&mut self, frame: &Frame) {
        if frame.header.is_claim() {
            self.process_claim(
                Name::from_payload(frame.payload),
                frame.header.pdu_specific(),
                frame.header.source_address(),
            );
        } else if frame.header.is_request() {
            self.process_request(frame.header.pdu_specific());
        }
    }

    /// Arbitrate the claim into the directory, announce first-seen
    /// controllers, then deliver the event: a unicast PS goes only to the
    /// claimer currently holding that address, anything else to everyone.
    fn process_claim(&mut self, name: Name, pdu_specific: u8, source_address: u8) {
        let known = self.network.in_network(name);
        self.network.try_address_claim(name, source_address);
        if !known {
            if let Some(callback) = self.on_new_controller.as_mut() {
                callback(name, source_address);
            }
        }

        // Claims may legally be addressed to a single controller, though
        // almost all traffic uses the global destination.
        if pdu_specific < ADDRESS_IDLE {
            if let Some(target) = self.network.get_name(pdu_specific) {
                if let Some(claimer) = self.claimers.get(&target) {
                    claimer.address_claim(name, source_address);
                }
            }
            return;
        }

        for claimer in self.claimers.values() {
            claimer.address_claim(name, source_address);
        }
    }

    fn process_request(&mut self, destination: u8) {
        if destination < ADDRESS_IDLE {
            if let Some(target) = self.network.get_name(destination) {
                if let Some(claimer) = self.claimers.get(&target) {
                    claimer.address_request(destination);
                }
            }
            return;
        }

        for claimer in self.claimers.values() {
            claimer.address_request(destination);
        }
    }
}
