//! Abstraction of the raw CAN socket a connection rides on. Allows the
//! library to plug into various implementations (SocketCAN, a bridge to
//! another process, an in-memory pair in tests).
use core::fmt;
use core::future::Future;

use crate::protocol::transport::frame::Frame;

/// Contract to open an interface and move raw 29-bit frames.
///
/// All methods take `&self`: implementations guard their own state
/// internally so one task can read while others write.
pub trait CanSocket: Send + Sync + 'static {
    type Error: fmt::Debug + Send;

    /// Bind the socket to a CAN interface by name.
    fn open(&self, interface: &str) -> Result<(), Self::Error>;

    /// Write one frame. Small raw-CAN writes either complete or fail;
    /// there is no partial outcome to report.
    fn send(&self, frame: &Frame) -> Result<(), Self::Error>;

    /// Retrieve the next available frame. Asynchronously waits until data
    /// arrives.
    fn recv(&self) -> impl Future<Output = Result<Frame, Self::Error>> + Send;
}
