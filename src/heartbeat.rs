//! Liveness checking: every 5 seconds one side writes a fixed message and
//! expects a fixed reply within 15 seconds, on pain of the connection being
//! torn down. Cancellation is cooperative via a [`CancellationToken`].

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

use crate::error::HeartbeatError;
use crate::transfer;

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_ROUND_TRIP_DEADLINE: Duration = Duration::from_secs(15);

const SENDER_MSG: &[u8; 4] = b"ping";
const RECEIVER_MSG: &[u8; 4] = b"pong";

/// Runs the heartbeat-sending side: writes `ping` every tick and expects
/// `pong` back within the round-trip deadline. Returns when cancelled or on
/// the first protocol/transport error.
pub async fn send_heartbeat<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    cancel: &CancellationToken,
) -> Result<(), HeartbeatError> {
    send_heartbeat_with_timing(stream, cancel, DEFAULT_TICK_INTERVAL, DEFAULT_ROUND_TRIP_DEADLINE).await
}

/// Same as [`send_heartbeat`], but with the tick interval and round-trip
/// deadline taken from configuration rather than the crate defaults.
pub async fn send_heartbeat_with_timing<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    cancel: &CancellationToken,
    tick_interval: Duration,
    round_trip_deadline: Duration,
) -> Result<(), HeartbeatError> {
    let mut ticker = interval(tick_interval);
    ticker.tick().await; // first tick fires immediately; skip it

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Err(HeartbeatError::CtxCancelled),
            _ = ticker.tick() => {
                transfer::send(stream, SENDER_MSG, round_trip_deadline).await?;
                log::debug!("send_heartbeat: sent heartbeat");

                let mut buf = [0u8; 4];
                transfer::receive(stream, &mut buf, round_trip_deadline).await?;

                if &buf != RECEIVER_MSG {
                    return Err(HeartbeatError::UnexpectedMsg(buf.to_vec()));
                }
                log::debug!("send_heartbeat: heartbeat acknowledged");
            }
        }
    }
}

/// Runs the heartbeat-receiving side: expects `ping` every tick and replies
/// with `pong`. Returns when cancelled or on the first protocol/transport
/// error.
pub async fn receive_heartbeat<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    cancel: &CancellationToken,
) -> Result<(), HeartbeatError> {
    receive_heartbeat_with_timing(stream, cancel, DEFAULT_TICK_INTERVAL, DEFAULT_ROUND_TRIP_DEADLINE).await
}

/// Same as [`receive_heartbeat`], but with the tick interval and round-trip
/// deadline taken from configuration rather than the crate defaults.
pub async fn receive_heartbeat_with_timing<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    cancel: &CancellationToken,
    tick_interval: Duration,
    round_trip_deadline: Duration,
) -> Result<(), HeartbeatError> {
    let mut ticker = interval(tick_interval);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Err(HeartbeatError::CtxCancelled),
            _ = ticker.tick() => {
                let mut buf = [0u8; 4];
                transfer::receive(stream, &mut buf, round_trip_deadline).await?;

                if &buf != SENDER_MSG {
                    return Err(HeartbeatError::UnexpectedMsg(buf.to_vec()));
                }
                log::debug!("receive_heartbeat: heartbeat received");

                transfer::send(stream, RECEIVER_MSG, round_trip_deadline).await?;
                log::debug!("receive_heartbeat: heartbeat acknowledged");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancellation_stops_the_loop() {
        let (mut a, _b) = tokio::io::duplex(64);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = send_heartbeat(&mut a, &cancel).await.unwrap_err();
        assert!(matches!(err, HeartbeatError::CtxCancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn unexpected_message_is_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        let cancel = CancellationToken::new();

        let responder = tokio::spawn(async move {
            let mut buf = [0u8; 4];
            tokio::io::AsyncReadExt::read_exact(&mut b, &mut buf).await.unwrap();
            tokio::io::AsyncWriteExt::write_all(&mut b, b"nope").await.unwrap();
        });

        let sender = tokio::spawn(async move { send_heartbeat(&mut a, &cancel).await });
        tokio::time::advance(DEFAULT_TICK_INTERVAL).await;

        let err = sender.await.unwrap().unwrap_err();
        responder.await.unwrap();

        assert!(matches!(err, HeartbeatError::UnexpectedMsg(_)));
    }
}
