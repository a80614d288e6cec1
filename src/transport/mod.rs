//! Reliable-over-UDP transport: a thin adapter over [`tokio_kcp`], the Rust
//! analogue of the reference implementation's `kcp-go` dependency. Nothing
//! upstream of this module knows it is KCP rather than, say, TCP; callers
//! only see an `AsyncRead + AsyncWrite` connection and a listener that
//! yields them.

mod reliable;

pub use reliable::{dial, Connection, Listener, TransportConfig};
