//! Address management per SAE J1939-81: the 64-bit NAME, the shared
//! NAME ↔ address directory, the pure claim state machine, the claimer that
//! drives one machine with real timers, and the network manager that fans
//! bus traffic out to many claimers.
/// Coordinator owning one state machine plus its contention/retry timers.
pub mod address_claimer;
/// Pure address-claim state machine (no I/O, no timers).
pub mod address_state;
/// 64-bit J1939 NAME field.
pub mod name;
/// Shared NAME ↔ address directory.
pub mod network;
/// Fan-out of claim/request frames to the claimers they concern.
pub mod network_manager;
