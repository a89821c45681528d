//! J1939-21 transport protocol engine: TP.CM (PGN 0xEC00) and TP.DT
//! (PGN 0xEB00) for both BAM (broadcast) and RTS/CTS (peer-to-peer) flows,
//! carrying payloads of 9 to 1785 bytes. Sessions are keyed by the
//! `(source, destination)` address pair; per-session watchdogs run off the
//! [`TransportProtocol::tick`] scan.
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::error::J1939Error;
use crate::protocol::j1939::{ADDRESS_GLOBAL, OnData, OnError, PF_PDU1_MAX, PGN_TP_CM, PGN_TP_DT};
use crate::protocol::transport::frame::{Data, Frame};
use crate::protocol::transport::frame_header::FrameHeader;
use crate::protocol::transport::traits::bus::Bus;
use crate::protocol::transport::{AbortCode, Control, T2, T3, TP_MAX_PAYLOAD, TP_PACKET_DATA};

/// Default period of the internal watchdog timer.
pub const TICK_PERIOD: Duration = Duration::from_millis(100);

/// Session key: `(src_sa, dst_sa)`, destination global for BAM.
type SessionKey = (u8, u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Tx,
    Rx,
}

/// State of one multi-packet transfer.
#[derive(Debug)]
struct TpSession {
    direction: Direction,
    /// Full message, outgoing or under reassembly.
    buffer: Vec<u8>,
    length: u16,
    total_packets: u8,
    /// Next sequence number to send (Tx) or expect (Rx); numbering starts
    /// at 1.
    next_seq: u8,
    /// Packets per CTS window.
    window_size: u8,
    src_sa: u8,
    dest_sa: u8,
    /// PGN of the enclosed message.
    pgn: u32,
    bam: bool,
    last_activity: Instant,
}

impl TpSession {
    /// Address of the other end of the session.
    fn remote(&self) -> u8 {
        match self.direction {
            Direction::Tx => self.dest_sa,
            Direction::Rx => self.src_sa,
        }
    }
}

/// Transport protocol dispatcher over a pluggable [`Bus`].
///
/// Feed every incoming frame to [`TransportProtocol::on_can_frame`]; frames
/// that are not TP.CM/TP.DT are ignored. Reassembled messages surface
/// through the rx handler, failures through the error handler; neither is
/// fatal to the engine.
pub struct TransportProtocol<B: Bus> {
    bus: B,
    sessions: HashMap<SessionKey, TpSession>,
    rx_callback: Option<OnData>,
    error_callback: Option<OnError>,
}

impl<B: Bus> TransportProtocol<B> {
    /// Engine writing through the given bus.
    pub fn new(bus: B) -> Self {
        Self {
            bus,
            sessions: HashMap::new(),
            rx_callback: None,
            error_callback: None,
        }
    }

    /// Set the sink for reassembled messages.
    pub fn set_rx_handler(&mut self, callback: OnData) {
        self.rx_callback = Some(callback);
    }

    /// Set the error callback.
    pub fn set_error_handler(&mut self, callback: OnError) {
        self.error_callback = Some(callback);
    }

    /// Number of sessions currently alive.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    //@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@//
    //@                           Tx path                              @//
    //@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@//

    /// Send a multi-packet message. A global destination selects BAM,
    /// anything else RTS/CTS.
    ///
    /// Returns `false` without touching the bus for payloads of eight bytes
    /// or less (single-frame territory, the caller's job) and for payloads
    /// over 1785 bytes (reported as an error).
    pub fn send(&mut self, data: &[u8], destination: u8, pgn: u32) -> bool {
        if data.len() <= 8 {
            return false;
        }
        if data.len() > TP_MAX_PAYLOAD {
            self.report_error("tp send", J1939Error::LengthExceeded);
            return false;
        }

        let bam = destination == ADDRESS_GLOBAL;
        let session = TpSession {
            direction: Direction::Tx,
            length: data.len() as u16,
            total_packets: data.len().div_ceil(TP_PACKET_DATA) as u8,
            buffer: data.to_vec(),
            next_seq: 1,
            window_size: 0xFF,
            src_sa: self.bus.source_address(),
            dest_sa: destination,
            pgn,
            bam,
            last_activity: Instant::now(),
        };
        let key = (session.src_sa, session.dest_sa);
        self.sessions.insert(key, session);

        if bam {
            self.send_bam_start(key)
        } else {
            self.send_rts(key)
        }
    }

    /// Open a BAM flow: one announce frame, then every data packet
    /// back-to-back. No acknowledgment follows, so the session ends here.
    fn send_bam_start(&mut self, key: SessionKey) -> bool {
        let Some(frame) = self.control_frame(key, Control::Bam) else {
            return false;
        };
        if !self.bus.send(&frame) {
            self.fail_session(key, "tp send BAM");
            return false;
        }
        self.touch(key);
        self.send_data_packets(key, u8::MAX)
    }

    /// Open an RTS/CTS flow: announce and wait. Data only moves once the
    /// receiver grants a window.
    fn send_rts(&mut self, key: SessionKey) -> bool {
        let Some(frame) = self.control_frame(key, Control::Rts) else {
            return false;
        };
        if !self.bus.send(&frame) {
            self.fail_session(key, "tp send RTS");
            return false;
        }
        self.touch(key);
        true
    }

    /// Emit up to `budget` data packets in sequence. A BAM session is
    /// erased once the last packet went out; an RTS/CTS session stays and
    /// waits for the receiver's EOM.
    fn send_data_packets(&mut self, key: SessionKey, mut budget: u8) -> bool {
        loop {
            let frame = {
                let Some(session) = self.sessions.get_mut(&key) else {
                    return false;
                };
                if budget == 0 || session.next_seq > session.total_packets {
                    break;
                }
                let frame = data_frame(session);
                session.next_seq += 1;
                session.last_activity = Instant::now();
                budget -= 1;
                frame
            };
            if !self.bus.send(&frame) {
                self.fail_session(key, "tp send DT");
                return false;
            }
        }

        let finished = self
            .sessions
            .get(&key)
            .is_some_and(|session| session.bam && session.next_seq > session.total_packets);
        if finished {
            self.sessions.remove(&key);
        }
        true
    }

    /// The receiver granted a window: align the send cursor with its
    /// expectation and move data.
    fn handle_cts(&mut self, frame: &Frame) {
        let key = (self.bus.source_address(), frame.header.source_address());
        let Some(session) = self.sessions.get_mut(&key) else {
            return;
        };
        if session.direction != Direction::Tx || session.bam {
            return;
        }
        let budget = frame.payload[1];
        let next_seq = frame.payload[2];
        if (1..=session.total_packets).contains(&next_seq) {
            session.next_seq = next_seq;
        }
        session.last_activity = Instant::now();
        // A zero budget is a hold-off: the receiver keeps the session open
        // without requesting data yet.
        if budget > 0 {
            self.send_data_packets(key, budget);
        }
    }

    /// The receiver confirmed the whole message: the Tx session is done.
    fn handle_eom(&mut self, frame: &Frame) {
        let key = (self.bus.source_address(), frame.header.source_address());
        if self
            .sessions
            .get(&key)
            .is_some_and(|session| session.direction == Direction::Tx)
        {
            self.sessions.remove(&key);
        }
    }

    //@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@//
    //@                           Rx path                              @//
    //@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@//

    /// Feed one incoming J1939 frame to the dispatcher. Anything that is
    /// not TP.CM or TP.DT is ignored.
    pub fn on_can_frame(&mut self, frame: &Frame) {
        match frame.header.pgn() {
            PGN_TP_CM => self.handle_cm(frame),
            PGN_TP_DT => self.handle_dt(frame),
            _ => {}
        }
    }

    fn handle_cm(&mut self, frame: &Frame) {
        match Control::from_byte(frame.payload[0]) {
            Some(Control::Rts) => self.start_rx_rts(frame),
            Some(Control::Cts) => self.handle_cts(frame),
            Some(Control::Bam) => self.start_rx_bam(frame),
            Some(Control::Eom) => self.handle_eom(frame),
            Some(Control::Abort) => self.handle_abort(frame),
            None => {}
        }
    }

    /// A peer wants to send to us: allocate the reassembly buffer and grant
    /// the first window.
    fn start_rx_rts(&mut self, frame: &Frame) {
        if frame.header.pdu_specific() != self.bus.source_address() {
            return;
        }
        let Some(session) = rx_session(frame, /*bam=*/ false) else {
            return;
        };
        let key = (session.src_sa, session.dest_sa);
        let cts = cts_frame(&session, session.window_size, 1);
        self.sessions.insert(key, session);
        if !self.bus.send(&cts) {
            self.fail_session(key, "tp send CTS");
        }
    }

    /// A broadcast announce: allocate the buffer and collect packets, no
    /// flow control.
    fn start_rx_bam(&mut self, frame: &Frame) {
        let Some(session) = rx_session(frame, /*bam=*/ true) else {
            return;
        };
        self.sessions.insert((session.src_sa, session.dest_sa), session);
    }

    /// One data packet: slot it into the buffer, finish or keep the flow
    /// control moving.
    fn handle_dt(&mut self, frame: &Frame) {
        let key = (frame.header.source_address(), frame.header.pdu_specific());
        let Some(session) = self.sessions.get_mut(&key) else {
            return;
        };

        // Out-of-range sequence numbers are dropped without side effect.
        let seq = frame.payload[0];
        if seq < 1 || seq > session.total_packets {
            return;
        }
        let offset = (seq as usize - 1) * TP_PACKET_DATA;
        if offset >= session.buffer.len() {
            return;
        }
        let available = TP_PACKET_DATA.min(session.buffer.len() - offset);
        session.buffer[offset..offset + available].copy_from_slice(&frame.payload[1..1 + available]);
        session.last_activity = Instant::now();

        if seq == session.total_packets {
            let Some(session) = self.sessions.remove(&key) else {
                return;
            };
            self.deliver(&session);
            if !session.bam {
                let eom = eom_frame(&session);
                if !self.bus.send(&eom) {
                    self.report_error("tp send EOM", J1939Error::SendFailure);
                }
            }
            return;
        }

        session.next_seq = seq + 1;
        if !session.bam && session.window_size > 0 && seq % session.window_size == 0 {
            let cts = cts_frame(session, session.window_size, seq + 1);
            if !self.bus.send(&cts) {
                self.fail_session(key, "tp send CTS");
            }
        }
    }

    /// Hand the reassembled message to the rx handler.
    fn deliver(&mut self, session: &TpSession) {
        let Some(callback) = self.rx_callback.as_mut() else {
            return;
        };
        let mut header = FrameHeader::new();
        header
            .set_pgn(session.pgn)
            .set_source_address(session.src_sa)
            .set_payload_length(session.buffer.len());
        // PDU2 group extensions live in the PS byte; only addressable PGNs
        // get the destination stamped in.
        if !session.bam && header.pdu_format() <= PF_PDU1_MAX {
            header.set_pdu_specific(session.dest_sa);
        }
        callback(Data::new(header, session.buffer.clone()));
    }

    /// The remote end tore the session down: erase it and surface the
    /// decoded reason.
    fn handle_abort(&mut self, frame: &Frame) {
        if frame.header.pdu_specific() != self.bus.source_address() {
            return;
        }
        let remote = frame.header.source_address();
        let tx_key = (self.bus.source_address(), remote);
        let rx_key = (remote, self.bus.source_address());
        let key = [tx_key, rx_key]
            .into_iter()
            .find(|key| self.sessions.contains_key(key));
        let Some(key) = key else {
            return;
        };
        self.sessions.remove(&key);
        let reason = AbortCode::from_byte(frame.payload[1]);
        self.report_error("tp remote abort", J1939Error::RemoteAbort(reason));
    }

    //@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@//
    //@                          Watchdogs                             @//
    //@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@//

    /// Expire idle sessions: Tx flows after T3, Rx flows after T2. Each
    /// expiry emits an abort, reports a timeout and erases the session.
    pub fn tick(&mut self) {
        let now = Instant::now();
        let expired: Vec<SessionKey> = self
            .sessions
            .iter()
            .filter_map(|(key, session)| {
                let limit = match session.direction {
                    Direction::Tx => T3,
                    Direction::Rx => T2,
                };
                (now.duration_since(session.last_activity) > limit).then_some(*key)
            })
            .collect();
        for key in expired {
            self.send_abort(key, AbortCode::Timeout);
            self.report_error("tp timeout", J1939Error::Timeout);
            self.sessions.remove(&key);
        }
    }

    /// Drive [`TransportProtocol::tick`] from a periodic task on the given
    /// executor. The returned handle stops the ticking when aborted.
    pub fn start_tick(
        transport: &Arc<Mutex<Self>>,
        handle: &Handle,
        period: Duration,
    ) -> JoinHandle<()>
    where
        B: 'static,
    {
        let transport = Arc::clone(transport);
        handle.spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                transport
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .tick();
            }
        })
    }

    //@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@//
    //@                           Helpers                              @//
    //@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@//

    /// The bus refused a frame mid-session: abort, report, erase.
    fn fail_session(&mut self, key: SessionKey, what: &str) {
        self.send_abort(key, AbortCode::ResourcesBusy);
        self.report_error(what, J1939Error::SendFailure);
        self.sessions.remove(&key);
    }

    /// Emit a connection abort towards the remote end of the session.
    fn send_abort(&mut self, key: SessionKey, code: AbortCode) {
        let Some(session) = self.sessions.get(&key) else {
            return;
        };
        let source = match session.direction {
            Direction::Tx => session.src_sa,
            Direction::Rx if session.bam => self.bus.source_address(),
            Direction::Rx => session.dest_sa,
        };
        let mut frame = cm_frame(Control::Abort, session.remote(), source);
        frame.payload[1] = code as u8;
        frame.payload[5..8].copy_from_slice(&session.pgn.to_le_bytes()[..3]);
        self.bus.send(&frame);
    }

    /// Control frame (RTS or BAM) announcing the session behind `key`.
    fn control_frame(&self, key: SessionKey, control: Control) -> Option<Frame> {
        let session = self.sessions.get(&key)?;
        let destination = if session.bam { ADDRESS_GLOBAL } else { session.dest_sa };
        let mut frame = cm_frame(control, destination, session.src_sa);
        frame.payload[1..3].copy_from_slice(&session.length.to_le_bytes());
        frame.payload[3] = session.total_packets;
        frame.payload[4] = session.window_size;
        frame.payload[5..8].copy_from_slice(&session.pgn.to_le_bytes()[..3]);
        Some(frame)
    }

    fn touch(&mut self, key: SessionKey) {
        if let Some(session) = self.sessions.get_mut(&key) {
            session.last_activity = Instant::now();
        }
    }

    fn report_error(&mut self, what: &str, error: J1939Error) {
        if let Some(callback) = self.error_callback.as_mut() {
            callback(what, error);
        }
    }
}

//==================================================================================
// Frame construction
//==================================================================================

/// Bare TP.CM frame: control byte set, everything else padded.
fn cm_frame(control: Control, destination: u8, source: u8) -> Frame {
    let mut header = FrameHeader::new();
    header
        .set_priority(7)
        .set_pgn(PGN_TP_CM)
        .set_pdu_specific(destination)
        .set_source_address(source)
        .set_payload_length(8);
    let mut payload = [0xFF; 8];
    payload[0] = control as u8;
    Frame::new(header, payload)
}

/// TP.DT frame for the session's next sequence number.
fn data_frame(session: &TpSession) -> Frame {
    let mut header = FrameHeader::new();
    header
        .set_priority(7)
        .set_pgn(PGN_TP_DT)
        .set_pdu_specific(session.dest_sa)
        .set_source_address(session.src_sa)
        .set_payload_length(8);
    let mut payload = [0xFF; 8];
    payload[0] = session.next_seq;
    let offset = (session.next_seq as usize - 1) * TP_PACKET_DATA;
    let available = TP_PACKET_DATA.min(session.buffer.len() - offset);
    payload[1..1 + available].copy_from_slice(&session.buffer[offset..offset + available]);
    Frame::new(header, payload)
}

/// CTS granting `budget` packets starting at `next_seq`, addressed to the
/// session's sender.
fn cts_frame(session: &TpSession, budget: u8, next_seq: u8) -> Frame {
    let mut frame = cm_frame(Control::Cts, session.src_sa, session.dest_sa);
    frame.payload[1] = budget;
    frame.payload[2] = next_seq;
    frame.payload[5..8].copy_from_slice(&session.pgn.to_le_bytes()[..3]);
    frame
}

/// End-of-message acknowledgment, addressed to the session's sender.
fn eom_frame(session: &TpSession) -> Frame {
    let mut frame = cm_frame(Control::Eom, session.src_sa, session.dest_sa);
    frame.payload[1..3].copy_from_slice(&session.length.to_le_bytes());
    frame.payload[3] = session.total_packets;
    frame.payload[5..8].copy_from_slice(&session.pgn.to_le_bytes()[..3]);
    frame
}

/// Receive session from the length/packet-count/window/PGN fields of an
/// RTS or BAM announce. Announces with lengths outside the multi-packet
/// range are discarded.
fn rx_session(frame: &Frame, bam: bool) -> Option<TpSession> {
    let length = u16::from_le_bytes([frame.payload[1], frame.payload[2]]);
    if !(9..=TP_MAX_PAYLOAD as u16).contains(&length) {
        return None;
    }
    Some(TpSession {
        direction: Direction::Rx,
        buffer: vec![0; length as usize],
        length,
        total_packets: frame.payload[3],
        next_seq: 1,
        // The window byte of a BAM announce is padding; RTS windows are
        // clamped so the intermediate-CTS modulus stays defined.
        window_size: if bam { 0xFF } else { frame.payload[4].max(1) },
        src_sa: frame.header.source_address(),
        dest_sa: if bam { ADDRESS_GLOBAL } else { frame.header.pdu_specific() },
        pgn: u32::from_le_bytes([frame.payload[5], frame.payload[6], frame.payload[7], 0]),
        bam,
        last_activity: Instant::now(),
    })
}
