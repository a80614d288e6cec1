//! Named-stream rendezvous layered over an anonymous multiplex session,
//! backed by [`yamux`] (the Rust analogue of the reference implementation's
//! `smux` dependency).

pub mod manager;
mod session;
mod stream;

pub use manager::Manager;
pub use stream::Stream;
pub use yamux::Mode;
