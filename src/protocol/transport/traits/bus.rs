//! Minimal abstraction of an outbound CAN bus as the transport protocol
//! engine sees it: fire one frame, know the local source address.
use crate::protocol::transport::frame::Frame;

/// Contract the transport engine writes through.
///
/// `send` reports acceptance only: `false` means the bus layer refused the
/// frame and the engine aborts the session it belongs to. The source
/// address is read at session creation to key outgoing sessions.
pub trait Bus: Send + Sync {
    /// Emit a fully formed frame on the bus.
    fn send(&self, frame: &Frame) -> bool;

    /// Source address currently held by the local node, or the idle
    /// address when none is claimed.
    fn source_address(&self) -> u8;
}
