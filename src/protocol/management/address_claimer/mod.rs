//! Coordinator wrapping one [`AddressStateMachine`] with the pieces the
//! pure machine refuses to own: the 250 ms contention timer, the random
//! cannot-claim delay, and a serial event queue. Incoming frames are turned
//! into machine events, machine actions are turned into outgoing frames and
//! directory updates.
use core::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use rand::Rng;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};

use crate::error::J1939Error;
use crate::protocol::j1939::{OnAddress, OnError, OnFrame, OnLog, OnName, ADDRESS_GLOBAL};
use crate::protocol::management::address_state::{AddressStateMachine, ClaimCallbacks, ClaimEvent};
use crate::protocol::management::name::Name;
use crate::protocol::management::network::Network;
use crate::protocol::transport::frame::Frame;

/// Contention window after putting a claim on the bus. Controllers with
/// addresses in 0-127 or 248-253 may legally answer sooner; this core
/// always waits out the full window.
const CONTENTION_TIMEOUT: Duration = Duration::from_millis(250);

/// Upper bound of the uniform random delay before a cannot-claim goes out.
const RETRY_DELAY_MAX_MS: u64 = 150;

/// Inputs serialized onto the claimer's event queue. Timer expirations feed
/// the same queue as bus traffic, so one claimer observes a total order.
enum Input {
    StartClaim(u8),
    /// Claim seen on the bus, not yet arbitrated into the directory.
    ProcessClaim { name: Name, address: u8 },
    /// Claim event pre-arbitrated by the network manager.
    AddressClaim { name: Name, address: u8 },
    AddressRequest { destination: u8 },
    ContentionElapsed,
    RetryElapsed,
}

/// Driver for the address claim of a single NAME.
///
/// Construction spawns a runner task on the given executor; all events,
/// timers and callbacks run there, strictly serialized. Dropping the
/// claimer aborts the runner and everything it has pending.
pub struct AddressClaimer {
    name: Name,
    events: mpsc::UnboundedSender<Input>,
    callbacks: Arc<CallbackSet>,
    runner: JoinHandle<()>,
}

impl AddressClaimer {
    /// Spawn a claimer for `name` on the executor behind `handle`, sharing
    /// the given directory.
    pub fn new(handle: &Handle, name: Name, network: Arc<Network>) -> Self {
        let (events, queue) = mpsc::unbounded_channel();
        let callbacks = Arc::new(CallbackSet::default());
        let runner = Runner {
            machine: AddressStateMachine::new(name),
            network,
            callbacks: Arc::clone(&callbacks),
            events: events.clone(),
            contention_timer: None,
            retry_timer: None,
        };
        let runner = handle.spawn(runner.run(queue));
        Self { name, events, callbacks, runner }
    }

    /// NAME this claimer is getting an address for.
    pub fn name(&self) -> Name {
        self.name
    }

    /// Lightweight handle for routing events to this claimer, e.g. from the
    /// network manager.
    pub fn handle(&self) -> ClaimerHandle {
        ClaimerHandle { name: self.name, events: self.events.clone() }
    }

    /// Start the address claiming process. Only effective while the machine
    /// sits in its initial no-address state; ignored otherwise.
    pub fn start_address_claim(&self, preferred_address: u8) {
        let _ = self.events.send(Input::StartClaim(preferred_address));
    }

    /// Process a J1939 frame containing an address claim or request. Other
    /// frames are ignored.
    pub fn process(&self, frame: &Frame) {
        if frame.header.is_claim() {
            let _ = self.events.send(Input::ProcessClaim {
                name: Name::from_payload(frame.payload),
                address: frame.header.source_address(),
            });
        } else if frame.header.is_request() {
            let _ = self.events.send(Input::AddressRequest {
                destination: frame.header.pdu_specific(),
            });
        }
    }

    /// Deliver an address-claim event that has already been arbitrated into
    /// the directory.
    pub fn address_claim(&self, name: Name, address: u8) {
        let _ = self.events.send(Input::AddressClaim { name, address });
    }

    /// Deliver an address-request event.
    pub fn address_request(&self, destination: u8) {
        let _ = self.events.send(Input::AddressRequest { destination });
    }

    /// Set the callback fired when the NAME gains an address.
    pub fn on_address_claimed(&self, callback: OnAddress) {
        self.callbacks.set_address(callback);
    }

    /// Set the callback fired when the NAME loses its address.
    pub fn on_address_lost(&self, callback: OnName) {
        self.callbacks.set_lose(callback);
    }

    /// Set the sink for frames the claimer wants on the bus.
    pub fn on_frame(&self, callback: OnFrame) {
        self.callbacks.set_frame(callback);
    }

    /// Set the error callback.
    pub fn on_error(&self, callback: OnError) {
        self.callbacks.set_error(callback);
    }

    /// Set the sink for state machine trace lines.
    pub fn on_log(&self, callback: OnLog) {
        self.callbacks.set_log(callback);
    }
}

impl Drop for AddressClaimer {
    fn drop(&mut self) {
        self.runner.abort();
    }
}

/// Cloneable routing handle onto a claimer's event queue.
#[derive(Clone)]
pub struct ClaimerHandle {
    name: Name,
    events: mpsc::UnboundedSender<Input>,
}

impl ClaimerHandle {
    /// NAME of the claimer behind this handle.
    pub fn name(&self) -> Name {
        self.name
    }

    /// Deliver a pre-arbitrated address-claim event.
    pub fn address_claim(&self, name: Name, address: u8) {
        let _ = self.events.send(Input::AddressClaim { name, address });
    }

    /// Deliver an address-request event.
    pub fn address_request(&self, destination: u8) {
        let _ = self.events.send(Input::AddressRequest { destination });
    }
}

//==================================================================================
// Runner
//==================================================================================

/// Requests collected from machine actions during one event, applied after
/// the machine returns.
#[derive(Default)]
struct TimerRequests {
    contention: bool,
    retry: bool,
}

struct Runner {
    machine: AddressStateMachine,
    network: Arc<Network>,
    callbacks: Arc<CallbackSet>,
    events: mpsc::UnboundedSender<Input>,
    contention_timer: Option<JoinHandle<()>>,
    retry_timer: Option<JoinHandle<()>>,
}

impl Runner {
    async fn run(mut self, mut queue: mpsc::UnboundedReceiver<Input>) {
        while let Some(input) = queue.recv().await {
            self.handle_input(input);
        }
        self.disarm();
    }

    fn handle_input(&mut self, input: Input) {
        match input {
            Input::StartClaim(preferred) => {
                self.dispatch(ClaimEvent::StartClaim { preferred });
            }
            Input::ProcessClaim { name, address } => {
                // The observed claim is fact: arbitrate it into the
                // directory before the machine sees it. A lost arbitration
                // is reported and goes no further.
                if self.network.try_address_claim(name, address) {
                    self.dispatch(ClaimEvent::AddressClaim { name, address });
                } else {
                    self.callbacks.error("address claim", J1939Error::AddressInUse);
                }
            }
            Input::AddressClaim { name, address } => {
                self.dispatch(ClaimEvent::AddressClaim { name, address });
            }
            Input::AddressRequest { destination } => {
                self.dispatch(ClaimEvent::AddressRequest { destination });
            }
            Input::ContentionElapsed => {
                self.contention_timer = None;
                self.dispatch(ClaimEvent::Timeout);
            }
            Input::RetryElapsed => {
                self.retry_timer = None;
                // The delayed cannot-claim goes on the bus now; only
                // self-configurable NAMEs get another try afterwards.
                self.callbacks.frame(Frame::make_cannot_claim(self.machine.name()));
                if self.machine.name().self_config_address() {
                    self.dispatch(ClaimEvent::RandomRetry);
                }
            }
        }
    }

    fn dispatch(&mut self, event: ClaimEvent) {
        let mut timers = TimerRequests::default();
        {
            let mut actions = RunnerActions {
                network: &self.network,
                callbacks: &self.callbacks,
                timers: &mut timers,
            };
            self.machine.process_event(&self.network, event, &mut actions);
        }
        if timers.contention {
            self.arm_contention();
        }
        if timers.retry {
            self.arm_retry();
        }
    }

    /// (Re)arm the 250 ms contention window. A pending window is superseded
    /// silently.
    fn arm_contention(&mut self) {
        if let Some(timer) = self.contention_timer.take() {
            timer.abort();
        }
        let events = self.events.clone();
        self.contention_timer = Some(tokio::spawn(async move {
            sleep(CONTENTION_TIMEOUT).await;
            let _ = events.send(Input::ContentionElapsed);
        }));
    }

    /// (Re)arm the anti-collision delay before a cannot-claim goes out.
    fn arm_retry(&mut self) {
        if let Some(timer) = self.retry_timer.take() {
            timer.abort();
        }
        let delay = Duration::from_millis(rand::thread_rng().gen_range(0..=RETRY_DELAY_MAX_MS));
        let events = self.events.clone();
        self.retry_timer = Some(tokio::spawn(async move {
            sleep(delay).await;
            let _ = events.send(Input::RetryElapsed);
        }));
    }

    fn disarm(&mut self) {
        if let Some(timer) = self.contention_timer.take() {
            timer.abort();
        }
        if let Some(timer) = self.retry_timer.take() {
            timer.abort();
        }
    }
}

/// Machine callback bundle living for one `process_event` call: forwards
/// outputs to the user callbacks, mirrors address changes into the
/// directory and collects timer requests.
struct RunnerActions<'a> {
    network: &'a Network,
    callbacks: &'a CallbackSet,
    timers: &'a mut TimerRequests,
}

impl ClaimCallbacks for RunnerActions<'_> {
    fn on_address(&mut self, name: Name, address: u8) {
        self.network.try_address_claim(name, address);
        self.callbacks.address(name, address);
    }

    fn on_lose_address(&mut self, name: Name) {
        self.network.release(name);
        self.callbacks.lose(name);
    }

    fn on_begin_claiming(&mut self) {
        self.timers.contention = true;
    }

    fn on_address_claim(&mut self, name: Name, address: u8) {
        self.callbacks.frame(Frame::make_address_claim(name, address));
    }

    fn on_request(&mut self) {
        self.callbacks.frame(Frame::make_address_request(ADDRESS_GLOBAL));
    }

    fn on_cannot_claim(&mut self, _name: Name) {
        self.timers.retry = true;
    }

    fn on_log(&mut self, line: fmt::Arguments<'_>) {
        self.callbacks.log(line);
    }
}

//==================================================================================
// Callback storage
//==================================================================================

#[derive(Default)]
struct CallbackSet {
    on_address: Mutex<Option<OnAddress>>,
    on_lose_address: Mutex<Option<OnName>>,
    on_frame: Mutex<Option<OnFrame>>,
    on_error: Mutex<Option<OnError>>,
    on_log: Mutex<Option<OnLog>>,
}

impl CallbackSet {
    fn set_address(&self, callback: OnAddress) {
        *self.on_address.lock().unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }

    fn set_lose(&self, callback: OnName) {
        *self.on_lose_address.lock().unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }

    fn set_frame(&self, callback: OnFrame) {
        *self.on_frame.lock().unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }

    fn set_error(&self, callback: OnError) {
        *self.on_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }

    fn set_log(&self, callback: OnLog) {
        *self.on_log.lock().unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }

    fn address(&self, name: Name, address: u8) {
        if let Some(callback) = self.on_address.lock().unwrap_or_else(PoisonError::into_inner).as_mut() {
            callback(name, address);
        }
    }

    fn lose(&self, name: Name) {
        if let Some(callback) = self.on_lose_address.lock().unwrap_or_else(PoisonError::into_inner).as_mut() {
            callback(name);
        }
    }

    fn frame(&self, frame: Frame) {
        if let Some(callback) = self.on_frame.lock().unwrap_or_else(PoisonError::into_inner).as_mut() {
            callback(frame);
        }
    }

    fn error(&self, what: &str, error: J1939Error) {
        if let Some(callback) = self.on_error.lock().unwrap_or_else(PoisonError::into_inner).as_mut() {
            callback(what, error);
        }
    }

    fn log(&self, line: fmt::Arguments<'_>) {
        if let Some(callback) = self.on_log.lock().unwrap_or_else(PoisonError::into_inner).as_mut() {
            callback(&line.to_string());
        }
    }
}
