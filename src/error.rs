//! Error definitions shared across library modules.
//! Every component reports failures through the same `(what, error)` callback
//! pair, so the whole taxonomy lives in one enum.
use crate::protocol::transport::AbortCode;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
/// Failures surfaced through the error callbacks of the claimer, the
/// transport engine and the connection. None of them are fatal: the
/// reporting component stays ready to accept new input afterwards.
pub enum J1939Error {
    /// The CAN socket layer refused an open, bind, read or write.
    /// Carries the socket implementation's own error rendering.
    #[error("socket error: {0}")]
    Socket(String),

    /// An observed address claim lost the directory arbitration because a
    /// higher-priority NAME already holds the address.
    #[error("address in use")]
    AddressInUse,

    /// A send path needing a local identity was used before one was bound.
    #[error("socket has no local name")]
    NoLocalName,

    /// A peer-to-peer send was attempted without a target name bound.
    #[error("socket has no connection name")]
    NoTargetName,

    /// The local NAME has not claimed a source address yet.
    #[error("socket has no source address")]
    NoSourceAddress,

    /// The destination NAME is registered but currently holds no address.
    #[error("destination has no address")]
    NoDestinationAddress,

    /// Transport payload exceeds the 1785-byte J1939-21 ceiling.
    #[error("payload too large")]
    LengthExceeded,

    /// A transport session saw no activity within its watchdog window.
    #[error("transport session timed out")]
    Timeout,

    /// The remote end aborted a transport session; carries the decoded
    /// abort reason.
    #[error("remote abort: {0}")]
    RemoteAbort(AbortCode),

    /// The bus layer refused a frame mid-session.
    #[error("bus refused frame")]
    SendFailure,
}
