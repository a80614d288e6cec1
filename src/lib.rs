//! OnyNet: an authenticated, multiplexed, named-stream networking library
//! built on a reliable-over-UDP transport.
//!
//! A connection starts as an anonymous reliable byte stream
//! ([`transport`]), is optionally hardened with a mutual RSA handshake that
//! derives a shared AES-256 key ([`auth`]), and is then carved into named
//! substreams over a single multiplexed session ([`multiplex`]) so that
//! unrelated conversations on the same connection never block one another.
//! A background heartbeat ([`heartbeat`]) keeps each side honest about
//! whether the other is still alive. [`client`] and [`server`] tie these
//! pieces together into the two sides of a connection.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]

// TODO: Clean up some or all of these exceptions
#![allow(clippy::if_not_else)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::unreadable_literal)]

pub mod auth;
pub mod client;
pub mod config;
pub mod crypto;
pub mod error;
pub mod heartbeat;
pub mod multiplex;
pub mod server;
pub mod transfer;
pub mod transport;

pub use client::Client;
pub use error::OnyNetError;
pub use server::Server;
