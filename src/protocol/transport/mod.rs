//! CAN transport layer: the 29-bit identifier codec, the 16-byte frame
//! type, the J1939-21 transport protocol engine (BAM + RTS/CTS) and the
//! pluggable bus/socket seams. Shared TP wire constants live here.
use core::fmt;
use core::time::Duration;

/// In-memory J1939 frame and the claim-related frame archetypes.
pub mod frame;
/// 29-bit J1939 identifier codec.
pub mod frame_header;
/// Pluggable seams: [`traits::bus::Bus`] for the transport engine,
/// [`traits::can_socket::CanSocket`] for the raw socket layer.
pub mod traits;
/// Multi-packet transport protocol engine (TP.CM / TP.DT).
pub mod transport_protocol;

/// Maximum payload a transport session can carry (255 packets x 7 bytes).
pub const TP_MAX_PAYLOAD: usize = 1785;

/// Payload bytes carried by one TP.DT packet.
pub const TP_PACKET_DATA: usize = 7;

/// Sender watchdog: RTS/CTS handshake response time.
pub const T1: Duration = Duration::from_millis(750);

/// Receiver watchdog: wait for the next TP.DT after a CTS.
pub const T2: Duration = Duration::from_millis(1250);

/// Sender watchdog: wait for CTS or EOM after sending.
pub const T3: Duration = Duration::from_millis(1250);

/// Minimum separation time between packets.
pub const TR: Duration = Duration::from_millis(200);

//==================================================================================
// TP control bytes (first byte of the TP.CM payload)
//==================================================================================

/// Connection-management control byte of a TP.CM frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Control {
    /// Request To Send: opens a peer-to-peer session.
    Rts = 0x10,
    /// Clear To Send: receiver grants a window of data packets.
    Cts = 0x11,
    /// End Of Message acknowledgment: receiver confirms completion.
    Eom = 0x13,
    /// Broadcast Announce Message: opens an unacknowledged broadcast flow.
    Bam = 0x20,
    /// Connection abort, with a reason code in byte 1.
    Abort = 0xFF,
}

impl Control {
    /// Decode the control byte of a TP.CM payload.
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x10 => Some(Self::Rts),
            0x11 => Some(Self::Cts),
            0x13 => Some(Self::Eom),
            0x20 => Some(Self::Bam),
            0xFF => Some(Self::Abort),
            _ => None,
        }
    }
}

//==================================================================================
// TP abort reasons (byte 1 of an ABORT TP.CM payload)
//==================================================================================

/// Reason code carried by a TP connection abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AbortCode {
    /// Node is already engaged in a session with the same pair.
    AlreadyInSession = 1,
    /// Resources needed for the session are tied up.
    ResourcesBusy = 2,
    /// A session watchdog expired.
    Timeout = 3,
    /// CTS received while data transfer was in progress.
    CtsWhileDt = 4,
    /// Retransmit limit reached.
    MaxRetransmit = 5,
    /// Unexpected data packet.
    UnexpectedPacket = 6,
    /// Bad sequence number.
    BadSequence = 7,
    /// Duplicate sequence number.
    DuplicateSeq = 8,
    /// Message length exceeds the protocol ceiling.
    LengthExceeded = 9,
    /// Catch-all for everything else.
    Unspecified = 250,
}

impl AbortCode {
    /// Decode byte 1 of an ABORT payload; unknown values map to
    /// [`AbortCode::Unspecified`].
    pub const fn from_byte(byte: u8) -> Self {
        match byte {
            1 => Self::AlreadyInSession,
            2 => Self::ResourcesBusy,
            3 => Self::Timeout,
            4 => Self::CtsWhileDt,
            5 => Self::MaxRetransmit,
            6 => Self::UnexpectedPacket,
            7 => Self::BadSequence,
            8 => Self::DuplicateSeq,
            9 => Self::LengthExceeded,
            _ => Self::Unspecified,
        }
    }
}

impl fmt::Display for AbortCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::AlreadyInSession => "already in session",
            Self::ResourcesBusy => "resources busy",
            Self::Timeout => "timeout",
            Self::CtsWhileDt => "cts during dt",
            Self::MaxRetransmit => "retransmit limit",
            Self::UnexpectedPacket => "unexpected packet",
            Self::BadSequence => "bad sequence",
            Self::DuplicateSeq => "duplicate seq",
            Self::LengthExceeded => "length exceeded",
            Self::Unspecified => "unspecified",
        };
        f.write_str(text)
    }
}
