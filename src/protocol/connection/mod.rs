//! J1939 connection: reads raw frames from a [`CanSocket`], post-filters
//! them against the directory (raw-CAN filters cannot follow dynamic
//! source addresses), feeds the transport engine, and offers the outbound
//! send paths that stamp addresses resolved through the directory.
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::error::J1939Error;
use crate::protocol::j1939::{OnData, OnError, OnFrame, ADDRESS_GLOBAL, ADDRESS_IDLE};
use crate::protocol::management::name::Name;
use crate::protocol::management::network::Network;
use crate::protocol::transport::frame::{Data, Frame};
use crate::protocol::transport::traits::bus::Bus;
use crate::protocol::transport::traits::can_socket::CanSocket;
use crate::protocol::transport::transport_protocol::TransportProtocol;

/// Local/target NAME pair scoping a connection.
#[derive(Default, Clone, Copy)]
struct NamePair {
    local: Option<Name>,
    target: Option<Name>,
}

/// Connection over a raw CAN socket.
///
/// The connection owns the socket and its read loop; it references the
/// shared directory to resolve addresses at send time and to post-filter
/// inbound traffic. Accepted frames reach the transport engine and the
/// data callback; *all* frames reach the raw read callback so claim
/// processing sees everything. Dropping the connection cancels the read
/// loop and the transport ticker.
///
/// Callbacks run on the connection's executor; they must not call back
/// into the same connection's send paths.
pub struct Connection<S: CanSocket> {
    handle: Handle,
    network: Arc<Network>,
    socket: Arc<S>,
    callbacks: Arc<Callbacks>,
    source_address: Arc<AtomicU8>,
    transport: Arc<Mutex<TransportProtocol<ConnectionBus<S>>>>,
    names: Arc<Mutex<NamePair>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl<S: CanSocket> Connection<S> {
    /// Unscoped connection: no local or target NAME bound, every frame
    /// accepted.
    pub fn new(handle: &Handle, network: Arc<Network>, socket: S) -> Self {
        Self::with_names(handle, network, socket, None, None)
    }

    /// Connection scoped to an optional local NAME (source of outgoing
    /// messages) and target NAME (peer it talks to).
    pub fn with_names(
        handle: &Handle,
        network: Arc<Network>,
        socket: S,
        local_name: Option<Name>,
        target_name: Option<Name>,
    ) -> Self {
        let socket = Arc::new(socket);
        let callbacks = Arc::new(Callbacks::default());
        let source_address = Arc::new(AtomicU8::new(ADDRESS_IDLE));
        let bus = ConnectionBus {
            socket: Arc::clone(&socket),
            callbacks: Arc::clone(&callbacks),
            source_address: Arc::clone(&source_address),
        };
        Self {
            handle: handle.clone(),
            network,
            socket,
            callbacks,
            source_address,
            transport: Arc::new(Mutex::new(TransportProtocol::new(bus))),
            names: Arc::new(Mutex::new(NamePair { local: local_name, target: target_name })),
            reader: Mutex::new(None),
            ticker: Mutex::new(None),
        }
    }

    /// Bind the socket to a CAN interface. Failure is reported through the
    /// error callback and leaves the connection reusable.
    pub fn open(&self, interface: &str) -> bool {
        match self.socket.open(interface) {
            Ok(()) => true,
            Err(error) => {
                let what = format!("open {interface} failed");
                self.callbacks.error(&what, J1939Error::Socket(format!("{error:?}")));
                false
            }
        }
    }

    /// Start the read loop. A fatal read error is reported once; reads are
    /// not re-armed afterwards.
    pub fn start(&self) {
        let socket = Arc::clone(&self.socket);
        let callbacks = Arc::clone(&self.callbacks);
        let transport = Arc::clone(&self.transport);
        let network = Arc::clone(&self.network);
        let names = Arc::clone(&self.names);
        let task = self.handle.spawn(async move {
            loop {
                match socket.recv().await {
                    Ok(frame) => {
                        callbacks.read(frame);
                        if check_address(&network, &names, &frame) {
                            transport
                                .lock()
                                .unwrap_or_else(PoisonError::into_inner)
                                .on_can_frame(&frame);
                            callbacks.data(Data::new(frame.header, frame.payload.to_vec()));
                        }
                    }
                    Err(error) => {
                        callbacks.error("read", J1939Error::Socket(format!("{error:?}")));
                        break;
                    }
                }
            }
        });
        let mut reader = self.reader.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = reader.replace(task) {
            previous.abort();
        }
    }

    /// Drive the transport watchdogs from a periodic task.
    pub fn start_tick(&self, period: Duration) {
        let task = TransportProtocol::start_tick(&self.transport, &self.handle, period);
        let mut ticker = self.ticker.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = ticker.replace(task) {
            previous.abort();
        }
    }

    /// ##################### Set/Get ##################### ///

    /// Set the callback invoked for every frame read from the socket,
    /// before the acceptance gate. Claim processing hangs off this.
    pub fn on_read(&self, callback: OnFrame) {
        self.callbacks.set_read(callback);
    }

    /// Set the callback invoked after a frame was written to the socket.
    pub fn on_send(&self, callback: OnFrame) {
        self.callbacks.set_send(callback);
    }

    /// Set the error callback, shared with the transport engine.
    pub fn on_error(&self, callback: OnError) {
        let shared = Arc::new(Mutex::new(callback));
        self.callbacks.set_error(Arc::clone(&shared));
        let forward: OnError = Box::new(move |what, error| {
            let mut callback = shared.lock().unwrap_or_else(PoisonError::into_inner);
            (*callback)(what, error);
        });
        self.transport
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .set_error_handler(forward);
    }

    /// Set the callback receiving accepted frames and reassembled
    /// transport messages.
    pub fn on_data(&self, callback: OnData) {
        let shared = Arc::new(Mutex::new(callback));
        self.callbacks.set_data(Arc::clone(&shared));
        let forward: OnData = Box::new(move |data| {
            let mut callback = shared.lock().unwrap_or_else(PoisonError::into_inner);
            (*callback)(data);
        });
        self.transport
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .set_rx_handler(forward);
    }

    /// Bind the local NAME used to resolve the source address of outgoing
    /// messages.
    pub fn set_local_name(&self, name: Name) {
        self.names.lock().unwrap_or_else(PoisonError::into_inner).local = Some(name);
    }

    /// Bind the target NAME used to resolve the destination of outgoing
    /// peer-to-peer messages.
    pub fn set_target_name(&self, name: Name) {
        self.names.lock().unwrap_or_else(PoisonError::into_inner).target = Some(name);
    }

    /// Local NAME, if one was bound.
    pub fn local_name(&self) -> Option<Name> {
        self.names.lock().unwrap_or_else(PoisonError::into_inner).local
    }

    /// Target NAME, if one was bound.
    pub fn target_name(&self) -> Option<Name> {
        self.names.lock().unwrap_or_else(PoisonError::into_inner).target
    }

    /// Directory this connection resolves addresses through.
    pub fn network(&self) -> &Arc<Network> {
        &self.network
    }

    /// ##################### Write ##################### ///

    /// Write a frame to the socket without any address resolution.
    pub fn send_raw(&self, frame: &Frame) -> bool {
        write(self.socket.as_ref(), &self.callbacks, frame)
    }

    /// Send a single frame, resolving addresses through the directory:
    /// broadcasts get the local source address stamped; peer-to-peer
    /// frames are routed to the bound target NAME.
    pub fn send_frame(&self, frame: &Frame) -> bool {
        if frame.header.is_broadcast() {
            let Some(source) = self.resolve_local() else {
                return false;
            };
            let mut out = *frame;
            out.header.set_source_address(source);
            self.send_raw(&out)
        } else {
            let Some(target) = self.target_name() else {
                self.callbacks.error("send", J1939Error::NoTargetName);
                return false;
            };
            self.send_to(target, frame)
        }
    }

    /// Send a single frame to a specific controller: both the source
    /// address and the PDU specific byte are resolved via the directory.
    pub fn send_to(&self, name: Name, frame: &Frame) -> bool {
        let Some(source) = self.resolve_local() else {
            return false;
        };
        let destination = self.network.get_address(name);
        if destination == ADDRESS_IDLE {
            self.callbacks.error("send", J1939Error::NoDestinationAddress);
            return false;
        }
        let mut out = *frame;
        out.header.set_source_address(source).set_pdu_specific(destination);
        self.send_raw(&out)
    }

    /// Send an application message of any size. Up to eight bytes goes out
    /// as a single frame; anything larger flows through the transport
    /// protocol (BAM towards the global address, RTS/CTS otherwise).
    pub fn send(&self, data: &Data) -> bool {
        if data.payload.len() <= 8 {
            let mut frame = Frame::new(data.header, [0; 8]);
            frame.header.set_payload_length(data.payload.len());
            frame.payload[..data.payload.len()].copy_from_slice(&data.payload);
            return self.send_frame(&frame);
        }

        let Some(source) = self.resolve_local() else {
            return false;
        };
        self.source_address.store(source, Ordering::Relaxed);
        let destination = if data.header.is_broadcast() {
            ADDRESS_GLOBAL
        } else {
            data.header.pdu_specific()
        };
        self.transport
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .send(&data.payload, destination, data.header.pgn())
    }

    /// Local NAME's current source address, with errors reported when the
    /// connection has no local identity or no claimed address yet.
    fn resolve_local(&self) -> Option<u8> {
        let Some(local) = self.local_name() else {
            self.callbacks.error("send", J1939Error::NoLocalName);
            return None;
        };
        let source = self.network.get_address(local);
        if source == ADDRESS_IDLE {
            self.callbacks.error("send", J1939Error::NoSourceAddress);
            return None;
        }
        Some(source)
    }
}

impl<S: CanSocket> Drop for Connection<S> {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.lock().unwrap_or_else(PoisonError::into_inner).take() {
            reader.abort();
        }
        if let Some(ticker) = self.ticker.lock().unwrap_or_else(PoisonError::into_inner).take() {
            ticker.abort();
        }
    }
}

/// Inbound acceptance gate.
///
/// Raw-CAN filters cannot re-scope when dynamic source addresses move, so
/// each received frame is checked against the current directory state:
/// with no names bound everything is accepted; broadcasts require the
/// target (if any) to be the sender; peer-to-peer traffic must come from
/// the target and/or be addressed to the local NAME, whichever are bound.
fn check_address(network: &Network, names: &Mutex<NamePair>, frame: &Frame) -> bool {
    let NamePair { local, target } = *names.lock().unwrap_or_else(PoisonError::into_inner);

    if local.is_none() && target.is_none() {
        return true;
    }

    if frame.header.is_broadcast() {
        return match target {
            Some(target) => network.get_address(target) == frame.header.source_address(),
            None => true,
        };
    }

    match (target, local) {
        (Some(target), Some(local)) => {
            network.get_address(target) == frame.header.source_address()
                && network.get_address(local) == frame.header.pdu_specific()
        }
        (None, Some(local)) => network.get_address(local) == frame.header.pdu_specific(),
        (Some(target), None) => network.get_address(target) == frame.header.source_address(),
        (None, None) => false,
    }
}

/// Shared write path: socket first, then the sent callback; failures go to
/// the error callback and report `false` to the caller.
fn write<S: CanSocket>(socket: &S, callbacks: &Callbacks, frame: &Frame) -> bool {
    match socket.send(frame) {
        Ok(()) => {
            callbacks.sent(frame);
            true
        }
        Err(error) => {
            callbacks.error("write", J1939Error::Socket(format!("{error:?}")));
            false
        }
    }
}

/// [`Bus`] adapter handing the transport engine the raw write path and the
/// connection's current source address.
struct ConnectionBus<S: CanSocket> {
    socket: Arc<S>,
    callbacks: Arc<Callbacks>,
    source_address: Arc<AtomicU8>,
}

impl<S: CanSocket> Bus for ConnectionBus<S> {
    fn send(&self, frame: &Frame) -> bool {
        write(self.socket.as_ref(), &self.callbacks, frame)
    }

    fn source_address(&self) -> u8 {
        self.source_address.load(Ordering::Relaxed)
    }
}

//==================================================================================
// Callback storage
//==================================================================================

/// Error and data callbacks are double-wrapped so the transport engine can
/// share them with the connection.
#[derive(Default)]
struct Callbacks {
    on_read: Mutex<Option<OnFrame>>,
    on_send: Mutex<Option<OnFrame>>,
    on_error: Mutex<Option<Arc<Mutex<OnError>>>>,
    on_data: Mutex<Option<Arc<Mutex<OnData>>>>,
}

impl Callbacks {
    fn set_read(&self, callback: OnFrame) {
        *self.on_read.lock().unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }

    fn set_send(&self, callback: OnFrame) {
        *self.on_send.lock().unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }

    fn set_error(&self, callback: Arc<Mutex<OnError>>) {
        *self.on_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }

    fn set_data(&self, callback: Arc<Mutex<OnData>>) {
        *self.on_data.lock().unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }

    fn read(&self, frame: Frame) {
        if let Some(callback) = self.on_read.lock().unwrap_or_else(PoisonError::into_inner).as_mut() {
            callback(frame);
        }
    }

    fn sent(&self, frame: &Frame) {
        if let Some(callback) = self.on_send.lock().unwrap_or_else(PoisonError::into_inner).as_mut() {
            callback(*frame);
        }
    }

    fn error(&self, what: &str, error: J1939Error) {
        let shared = self
            .on_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(Arc::clone);
        if let Some(shared) = shared {
            let mut callback = shared.lock().unwrap_or_else(PoisonError::into_inner);
            (*callback)(what, error);
        }
    }

    fn data(&self, data: Data) {
        let shared = self
            .on_data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(Arc::clone);
        if let Some(shared) = shared {
            let mut callback = shared.lock().unwrap_or_else(PoisonError::into_inner);
            (*callback)(data);
        }
    }
}
