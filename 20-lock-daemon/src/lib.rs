//! Advisory lock daemon.
//!
//! Clients ask for exclusive locks on named resources over TCP using a small
//! fixed-size binary protocol. A lock is granted when the resource is free,
//! and a lock held for longer than the configured timeout is handed to the
//! next requester, on the assumption that its holder died. There is no
//! ownership: any client may unlock any key.
//!
//! - [`key`] validates resource names.
//! - [`table`] is the shared lock table and its expiry policy.
//! - [`frame`] encodes and decodes request and response frames.
//! - [`session`] runs the request loop for one connection.
//! - [`server`] accepts connections and spawns a session task per client.
//! - [`client`] speaks the protocol from the other side.
//! - [`cli`] and [`logging`] wire up the `lockd` binary.

pub mod cli;
pub mod client;
pub mod frame;
pub mod key;
pub mod logging;
pub mod server;
pub mod session;
pub mod table;
