//! Wire constants from SAE J1939-21 / J1939-81 and the callback aliases
//! used to hand data out of the stack.
use crate::error::J1939Error;
use crate::protocol::management::name::Name;
use crate::protocol::transport::frame::{Data, Frame};

/// Highest usable unicast address. A total of 254 addresses (0-253) can
/// exist on one network segment.
pub const ADDRESS_MAX_UNICAST: u8 = 0xFD;

/// Idle or null address: the NAME is on the bus but holds no address.
pub const ADDRESS_IDLE: u8 = 0xFE;

/// Global / broadcast address, also used as the "no address" sentinel.
pub const ADDRESS_GLOBAL: u8 = 0xFF;

/// Placeholder NAME value.
pub const NO_NAME: u64 = 0;

/// Max PDU format (PF) an addressable message can have. A higher PF means
/// the message can only be broadcast (PDU2) and the PS field carries a
/// group extension instead of a destination.
pub const PF_PDU1_MAX: u8 = 0xEF;

/// PDU format of the Address Claimed message.
pub const PF_ADDRESS_CLAIM: u8 = 0xEE;

/// PDU format of the Request message.
pub const PF_REQUEST: u8 = 0xEA;

/// PDU format of the Acknowledgment message.
pub const PF_ACKNOWLEDGE: u8 = 0xE8;

/// Request PGN. Addressable: PS holds the target address or global.
/// Mask incoming PGNs with [`PGN_PDU1_MAX`] before comparing.
pub const PGN_REQUEST: u32 = 0x0EA00;

/// Address Claimed PGN. Addressable: PS holds the target address or global.
/// Mask incoming PGNs with [`PGN_PDU1_MAX`] before comparing.
pub const PGN_ADDRESS_CLAIMED: u32 = 0x0EE00;

/// Transport Protocol Connection Management PGN (TP.CM).
pub const PGN_TP_CM: u32 = 0x0EC00;

/// Transport Protocol Data Transfer PGN (TP.DT).
pub const PGN_TP_DT: u32 = 0x0EB00;

/// Mask covering reserved bit, data page and PDU format of a PGN. Strips
/// the PS byte of addressable (PDU1) PGNs.
pub const PGN_PDU1_MAX: u32 = 0x3FF00;

/// PGN max value and mask.
pub const PGN_MAX: u32 = 0x3FFFF;

/// Callback for a single outbound or inbound CAN frame.
pub type OnFrame = Box<dyn FnMut(Frame) + Send>;

/// Callback for an application message of any size (reassembled transport
/// messages included).
pub type OnData = Box<dyn FnMut(Data) + Send>;

/// Callback for an internal error: a short tag naming the operation that
/// failed plus the error itself.
pub type OnError = Box<dyn FnMut(&str, J1939Error) + Send>;

/// Callback for one structured log line.
pub type OnLog = Box<dyn FnMut(&str) + Send>;

/// Callback for a NAME gaining an address.
pub type OnAddress = Box<dyn FnMut(Name, u8) + Send>;

/// Callback for a NAME-only notification (address lost, new name observed).
pub type OnName = Box<dyn FnMut(Name) + Send>;
