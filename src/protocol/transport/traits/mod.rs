//! Seams between the protocol logic and its environment: the synchronous
//! [`bus::Bus`] the transport engine writes through, and the asynchronous
//! [`can_socket::CanSocket`] a connection reads raw frames from.
pub mod bus;
pub mod can_socket;
