//! `korri-j1939` library: the core of an SAE J1939 stack running on top of a
//! raw CAN bus. The crate covers dynamic address claiming per J1939-81 (one
//! state machine per NAME, defended against the rest of the bus), the shared
//! NAME ↔ address directory those machines arbitrate through, and the
//! J1939-21 transport protocol (BAM and RTS/CTS) for payloads larger than a
//! single frame. The CAN socket itself stays behind a small trait so the
//! stack can ride on SocketCAN, a test double, or anything else that moves
//! 29-bit frames.
//==================================================================================
/// Domain errors (directory conflicts, transport aborts, socket failures).
pub mod error;
/// Host-facing glue that is not protocol logic: CAN filter descriptors
/// offered to the upstream socket layer.
pub mod infra;
/// J1939 protocol implementation: frame codec, address management,
/// transport protocol, and connection dispatch.
pub mod protocol;
//==================================================================================
