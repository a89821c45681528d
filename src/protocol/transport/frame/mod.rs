//! In-memory representation of an SAE J1939 CAN frame, plus the claim
//! related frame archetypes and the variable-size [`Data`] message that
//! crosses the transport protocol.
use core::fmt;

use crate::protocol::j1939::{ADDRESS_GLOBAL, ADDRESS_IDLE, PF_ADDRESS_CLAIM, PF_REQUEST};
use crate::protocol::management::name::Name;
use crate::protocol::transport::frame_header::FrameHeader;

/// Raw J1939 frame as read from or written to the CAN bus. The layout is
/// the kernel's extended `can_frame`: 16 bytes, identifier and length first,
/// eight payload bytes after.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[repr(C)]
pub struct Frame {
    /// 29-bit identifier plus flags and payload length.
    pub header: FrameHeader,
    /// Payload buffer. Classic CAN frames always provide eight bytes; the
    /// header's length says how many are meaningful.
    pub payload: [u8; 8],
}

const _: () = assert!(core::mem::size_of::<Frame>() == 16);

impl Frame {
    /// Assemble a frame from a header and payload.
    #[inline]
    pub const fn new(header: FrameHeader, payload: [u8; 8]) -> Self {
        Self { header, payload }
    }

    //@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@//
    //@                        Frame archetypes                        @//
    //@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@//

    /// Request for the Address Claimed PGN, asking devices to announce the
    /// addresses they hold. Sent from the idle address so a node without an
    /// address may ask too.
    pub const fn make_address_request(destination: u8) -> Self {
        Self::new(
            FrameHeader::from_fields(6, false, PF_REQUEST, destination, ADDRESS_IDLE, 3),
            [0x00, 0xEE, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00],
        )
    }

    /// Address claim announcing that `name` holds (or wants) `address`.
    pub const fn make_address_claim(name: Name, address: u8) -> Self {
        Self::new(
            FrameHeader::from_fields(6, false, PF_ADDRESS_CLAIM, ADDRESS_GLOBAL, address, 8),
            name.to_payload(),
        )
    }

    /// Cannot-claim announcement: an address claim sent from the idle
    /// address, telling the bus that `name` failed to obtain one.
    pub const fn make_cannot_claim(name: Name) -> Self {
        Self::new(
            FrameHeader::from_fields(6, false, PF_ADDRESS_CLAIM, ADDRESS_GLOBAL, ADDRESS_IDLE, 8),
            name.to_payload(),
        )
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}:", self.header.id())?;
        for byte in &self.payload {
            write!(f, "{byte:02x}'")?;
        }
        Ok(())
    }
}

/// Application-level J1939 message of any size. Payloads up to eight bytes
/// map to a single frame; anything longer crosses the transport protocol.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Data {
    /// Header describing PGN, addressing and total length.
    pub header: FrameHeader,
    /// Message payload.
    pub payload: Vec<u8>,
}

impl Data {
    /// Assemble a message from a header and payload.
    #[inline]
    pub fn new(header: FrameHeader, payload: Vec<u8>) -> Self {
        Self { header, payload }
    }
}

impl fmt::Display for Data {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}:", self.header.id())?;
        for byte in &self.payload {
            write!(f, "{byte:02x}'")?;
        }
        Ok(())
    }
}
