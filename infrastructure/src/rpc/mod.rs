//! JSON-RPC 2.0 plumbing: protocol types, transports, and the
//! bidirectional connection.

pub mod connection;
pub mod protocol;
pub mod transport;
