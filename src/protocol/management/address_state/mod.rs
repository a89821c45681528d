//! Pure state machine for dynamic J1939 address claiming. One machine is
//! responsible for exactly one NAME/address pair; it performs no I/O and
//! holds no timers. Time and the bus reach it as [`ClaimEvent`]s, and every
//! effect leaves through the [`ClaimCallbacks`] bundle, so the machine is
//! deterministic given a directory snapshot and an event sequence.
use core::fmt;

use crate::protocol::j1939::{ADDRESS_GLOBAL, ADDRESS_IDLE};
use crate::protocol::management::name::Name;
use crate::protocol::management::network::Network;

/// Claim progress of one NAME.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimState {
    /// No address held and none being claimed. Initial state.
    NoAddress,
    /// An address claim is on the bus, waiting out the contention window.
    Claiming {
        /// Working address currently being claimed.
        address: u8,
    },
    /// The contention window passed: the address is owned.
    HasAddress {
        /// Address owned on the bus.
        address: u8,
    },
    /// Defeated by a higher-priority NAME with nowhere left to go.
    /// Distinct from [`ClaimState::NoAddress`]: it was reached by losing,
    /// not by never trying.
    AddressLost,
}

impl fmt::Display for ClaimState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::NoAddress => "no_address",
            Self::Claiming { .. } => "claiming",
            Self::HasAddress { .. } => "has_address",
            Self::AddressLost => "address_lost",
        };
        f.write_str(label)
    }
}

/// Inputs of the claim machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimEvent {
    /// Kick off the claiming process for a preferred address.
    StartClaim {
        /// Address the controller would like to hold.
        preferred: u8,
    },
    /// An address claim observed on the bus.
    AddressClaim {
        /// NAME of the claiming controller.
        name: Name,
        /// Address it claims (the frame's source address).
        address: u8,
    },
    /// A Request for the Address Claimed PGN observed on the bus.
    AddressRequest {
        /// Destination of the request, global or a specific address.
        destination: u8,
    },
    /// The 250 ms contention window elapsed.
    Timeout,
    /// The post-cannot-claim random delay elapsed. Only meaningful for
    /// self-configurable NAMEs.
    RandomRetry,
}

impl fmt::Display for ClaimEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::StartClaim { .. } => "start_claim",
            Self::AddressClaim { .. } => "address_claim",
            Self::AddressRequest { .. } => "address_request",
            Self::Timeout => "timeout",
            Self::RandomRetry => "random_retry",
        };
        f.write_str(label)
    }
}

/// Output bundle of the claim machine.
///
/// The machine never touches the bus or the directory itself: gaining or
/// losing an address, emitting frames and arming timers are all delegated
/// to the owner through these callbacks.
pub trait ClaimCallbacks {
    /// The machine entered `has_address` and owns `address`.
    fn on_address(&mut self, name: Name, address: u8);
    /// The machine left `has_address`; the address is no longer owned.
    fn on_lose_address(&mut self, name: Name);
    /// The machine entered `claiming`; the owner should arm the 250 ms
    /// contention timer and answer it with [`ClaimEvent::Timeout`].
    fn on_begin_claiming(&mut self);
    /// An address-claim frame should be emitted for `name` at `address`.
    fn on_address_claim(&mut self, name: Name, address: u8);
    /// An address-request frame should be emitted.
    fn on_request(&mut self);
    /// A cannot-claim frame should be emitted after the random delay; the
    /// owner answers with [`ClaimEvent::RandomRetry`] for self-configurable
    /// NAMEs.
    fn on_cannot_claim(&mut self, name: Name);
    /// One structured trace line per event, guard, action and transition.
    fn on_log(&mut self, line: fmt::Arguments<'_>) {
        let _ = line;
    }
}

/// State machine for dynamic J1939 address claiming.
///
/// The preferred address of the last [`ClaimEvent::StartClaim`] is kept so
/// a random retry restarts the search from the same place.
#[derive(Debug, Clone, Copy)]
pub struct AddressStateMachine {
    name: Name,
    preferred: u8,
    state: ClaimState,
}

impl AddressStateMachine {
    /// Machine in `no_address`, cold: no entry action runs until the first
    /// event arrives.
    pub const fn new(name: Name) -> Self {
        Self {
            name,
            preferred: 0,
            state: ClaimState::NoAddress,
        }
    }

    /// NAME this machine claims an address for.
    pub const fn name(&self) -> Name {
        self.name
    }

    /// Current state.
    pub const fn state(&self) -> ClaimState {
        self.state
    }

    /// Feed one event through the transition table.
    ///
    /// Guards are pure functions of the event and the directory snapshot;
    /// actions fire through `callbacks` in table order.
    pub fn process_event(
        &mut self,
        network: &Network,
        event: ClaimEvent,
        callbacks: &mut impl ClaimCallbacks,
    ) {
        callbacks.on_log(format_args!("[{:#018x}] process {}", self.name.raw(), event));
        match (self.state, event) {
            //==================================================== no_address
            (ClaimState::NoAddress, ClaimEvent::AddressRequest { destination }) => {
                if self.guard(callbacks, "is_global_address_req", destination == ADDRESS_GLOBAL) {
                    self.act(callbacks, "send_cannot_claim");
                    callbacks.on_cannot_claim(self.name);
                }
            }
            (ClaimState::NoAddress, ClaimEvent::StartClaim { preferred }) => {
                self.preferred = preferred;
                if self.guard(callbacks, "address_available", !network.is_full()) {
                    self.transition(callbacks, ClaimState::Claiming { address: preferred });
                    self.enter_claiming(network, preferred, callbacks);
                } else {
                    self.act(callbacks, "send_cannot_claim");
                    callbacks.on_cannot_claim(self.name);
                }
            }

            //==================================================== claiming
            (ClaimState::Claiming { address }, ClaimEvent::AddressClaim { name, address: claimed }) => {
                if !self.guard(callbacks, "address_conflict", claimed == address) {
                    return;
                }
                if self.guard(callbacks, "claiming_priority", self.name < name) {
                    // We outrank the challenger: defend the working address.
                    self.act(callbacks, "send_claiming");
                    callbacks.on_address_claim(self.name, address);
                } else if self.guard(callbacks, "claiming_loss", !network.is_full()) {
                    // Outranked but the bus still has room: pick again.
                    self.enter_claiming(network, address, callbacks);
                } else {
                    self.guard(callbacks, "claiming_failure", true);
                    self.transition(callbacks, ClaimState::AddressLost);
                    self.enter_address_lost(callbacks);
                }
            }
            (ClaimState::Claiming { address }, ClaimEvent::Timeout) => {
                let valid = network.claimable(address, self.name)
                    || network.get_address(self.name) < ADDRESS_IDLE;
                if self.guard(callbacks, "valid_address", valid) {
                    self.transition(callbacks, ClaimState::HasAddress { address });
                    self.act(callbacks, "notify_address_gain");
                    callbacks.on_address(self.name, address);
                } else {
                    self.guard(callbacks, "no_valid_address", true);
                    self.transition(callbacks, ClaimState::NoAddress);
                    self.enter_no_address(network, callbacks);
                }
            }
            (ClaimState::Claiming { address }, ClaimEvent::AddressRequest { destination }) => {
                let valid = destination == address || destination == ADDRESS_GLOBAL;
                if self.guard(callbacks, "valid_claiming_request", valid) {
                    self.act(callbacks, "send_claiming");
                    callbacks.on_address_claim(self.name, address);
                }
            }

            //==================================================== has_address
            (ClaimState::HasAddress { address }, ClaimEvent::AddressRequest { destination }) => {
                let valid = destination == address || destination == ADDRESS_GLOBAL;
                if self.guard(callbacks, "valid_address_request", valid) {
                    self.act(callbacks, "send_claimed");
                    callbacks.on_address_claim(self.name, address);
                }
            }
            (ClaimState::HasAddress { address }, ClaimEvent::AddressClaim { name, address: claimed }) => {
                if !self.guard(callbacks, "address_conflict", claimed == address) {
                    return;
                }
                if self.guard(callbacks, "claimed_priority", self.name < name) {
                    // Defend the owned address against the lower-priority
                    // challenger.
                    self.act(callbacks, "send_claimed");
                    callbacks.on_address_claim(self.name, address);
                } else if self.guard(callbacks, "claimed_loss", !network.is_full()) {
                    self.exit_has_address(callbacks);
                    self.transition(callbacks, ClaimState::Claiming { address });
                    self.enter_claiming(network, address, callbacks);
                } else {
                    self.guard(callbacks, "claimed_failure", true);
                    self.exit_has_address(callbacks);
                    self.transition(callbacks, ClaimState::AddressLost);
                    self.enter_address_lost(callbacks);
                }
            }

            //==================================================== address_lost
            (ClaimState::AddressLost, ClaimEvent::AddressRequest { destination }) => {
                if self.guard(callbacks, "is_global_address_req", destination == ADDRESS_GLOBAL) {
                    self.act(callbacks, "send_cannot_claim");
                    callbacks.on_cannot_claim(self.name);
                }
            }
            (ClaimState::AddressLost, ClaimEvent::RandomRetry) => {
                let allowed = self.name.self_config_address() && !network.is_full();
                if self.guard(callbacks, "retry_allowed", allowed) {
                    self.transition(callbacks, ClaimState::Claiming { address: self.preferred });
                    self.enter_claiming(network, self.preferred, callbacks);
                } else {
                    self.guard(callbacks, "retry_disallowed", true);
                    self.act(callbacks, "send_cannot_claim");
                    callbacks.on_cannot_claim(self.name);
                    self.transition(callbacks, ClaimState::NoAddress);
                    self.enter_no_address(network, callbacks);
                }
            }

            // Everything else is not in the table and is dropped.
            (state, event) => {
                callbacks.on_log(format_args!(
                    "[{:#018x}] ignore {} in {}",
                    self.name.raw(),
                    event,
                    state
                ));
            }
        }
    }

    //@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@//
    //@                     Entry / exit actions                       @//
    //@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@//

    /// Entry action of `claiming`, also used for the in-place re-claim when
    /// an outranked working address must be replaced: signal the owner to
    /// arm the contention timer, derive the working address from the
    /// directory, and put the claim on the bus.
    fn enter_claiming(
        &mut self,
        network: &Network,
        seed: u8,
        callbacks: &mut impl ClaimCallbacks,
    ) {
        self.act(callbacks, "begin_claiming_address");
        callbacks.on_begin_claiming();
        let address = network.find_address(self.name, seed);
        self.state = ClaimState::Claiming { address };
        callbacks.on_address_claim(self.name, address);
    }

    /// Entry action of `no_address` when reached by transition: ask the bus
    /// who is out there, as long as the directory leaves room to claim.
    /// A freshly built machine does not run this.
    fn enter_no_address(&mut self, network: &Network, callbacks: &mut impl ClaimCallbacks) {
        if self.guard(callbacks, "address_available", !network.is_full()) {
            self.act(callbacks, "send_request");
            callbacks.on_request();
        }
    }

    /// Entry action of `address_lost`.
    fn enter_address_lost(&mut self, callbacks: &mut impl ClaimCallbacks) {
        self.act(callbacks, "send_cannot_claim");
        callbacks.on_cannot_claim(self.name);
    }

    /// Exit action of `has_address`.
    fn exit_has_address(&mut self, callbacks: &mut impl ClaimCallbacks) {
        self.act(callbacks, "notify_address_loss");
        callbacks.on_lose_address(self.name);
    }

    //@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@//
    //@                          Trace helpers                         @//
    //@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@//

    fn guard(&self, callbacks: &mut impl ClaimCallbacks, tag: &str, pass: bool) -> bool {
        callbacks.on_log(format_args!(
            "[{:#018x}] guard {} [{}]",
            self.name.raw(),
            tag,
            if pass { "OK" } else { "Reject" }
        ));
        pass
    }

    fn act(&self, callbacks: &mut impl ClaimCallbacks, tag: &str) {
        callbacks.on_log(format_args!("[{:#018x}] action {}", self.name.raw(), tag));
    }

    fn transition(&mut self, callbacks: &mut impl ClaimCallbacks, next: ClaimState) {
        callbacks.on_log(format_args!(
            "[{:#018x}] {} -> {}",
            self.name.raw(),
            self.state,
            next
        ));
        self.state = next;
    }
}
