//! J1939 protocol logic, layered bottom-up: the frame codec and transport
//! engine live under [`transport`], NAME/address bookkeeping and the claim
//! machinery under [`management`], and the socket-facing dispatch glue under
//! [`connection`]. Wire constants shared by all of them sit in [`j1939`].
/// Connection dispatch: inbound acceptance gate and outbound send paths.
pub mod connection;
/// Wire constants and callback type aliases from SAE J1939-21 / J1939-81.
pub mod j1939;
/// Address management: NAME, directory, claim state machine, claimer,
/// network manager.
pub mod management;
/// CAN transport: identifier/frame codec, multi-packet transport protocol,
/// bus and socket seams.
pub mod transport;
