//! Server-to-server synchronisation: handshake, burst, netsplit.

pub mod burst;
pub mod handshake;
pub mod split;
