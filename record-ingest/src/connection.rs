//! One submission per connection: read, decode, persist, reply, close.
//!
//! A connection walks `accepted -> reading -> decoding -> persisting ->
//! responding -> closed`, and any failure jumps straight to `closed`. Each
//! step is logged with the peer address; those logs are the only record of
//! what happened to a client.

use std::net::SocketAddr;

use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    time::timeout,
};
use tracing::{debug, error, info, warn};

use crate::{
    protocol::{ACK, MAX_MESSAGE_BYTES},
    record::{self, DecodeError},
    server::ServerState,
};

/// How a connection ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Record persisted and acknowledged.
    Stored,
    /// Request failed validation; the client got an `ERR:` reply.
    Rejected(DecodeError),
    /// Peer closed without sending anything.
    Empty,
    /// Nothing arrived before the read deadline.
    TimedOut,
    ReadFailed,
    /// Persisting failed; the client got no reply.
    StoreFailed,
    /// The record was stored but the acknowledgement could not be sent.
    ReplyFailed,
}

pub(crate) async fn handle_connection<S>(
    mut stream: S,
    peer: SocketAddr,
    state: &ServerState,
) -> Outcome
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let active = state.register_session(peer).await;
    info!(%peer, active, "client connected");

    let outcome = serve_request(&mut stream, peer, state).await;

    close_stream(&mut stream, peer).await;
    let active = state.remove_session(peer).await;
    info!(%peer, active, ?outcome, "client disconnected");

    outcome
}

async fn serve_request<S>(stream: &mut S, peer: SocketAddr, state: &ServerState) -> Outcome
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buffer = vec![0u8; MAX_MESSAGE_BYTES];
    let received = match timeout(state.read_timeout(), stream.read(&mut buffer)).await {
        Ok(Ok(0)) => {
            info!(%peer, "connection closed without data, ignoring");
            return Outcome::Empty;
        }
        Ok(Ok(received)) => received,
        Ok(Err(err)) => {
            warn!(%peer, error = ?err, "failed to read request");
            return Outcome::ReadFailed;
        }
        Err(_) => {
            info!(%peer, timeout = ?state.read_timeout(), "no request before read deadline");
            return Outcome::TimedOut;
        }
    };

    let raw = &buffer[..received];
    info!(%peer, request = %String::from_utf8_lossy(raw).trim(), "request received");

    let record = match record::decode(raw) {
        Ok(record) => record.with_origin(peer, received_at()),
        Err(err) => {
            info!(%peer, reason = %err, "request rejected");
            if let Err(send_err) = write_reply(stream, err.reply().as_bytes()).await {
                debug!(%peer, error = ?send_err, "failed to send rejection");
            }
            return Outcome::Rejected(err);
        }
    };

    if let Err(err) = state.store().append(record).await {
        error!(%peer, error = ?err, "failed to persist record");
        return Outcome::StoreFailed;
    }
    info!(%peer, path = %state.store().path().display(), "record stored");

    match write_reply(stream, ACK).await {
        Ok(()) => {
            info!(%peer, "acknowledgement sent");
            Outcome::Stored
        }
        Err(err) => {
            warn!(%peer, error = ?err, "record stored but acknowledgement failed");
            Outcome::ReplyFailed
        }
    }
}

async fn write_reply<W>(writer: &mut W, reply: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(reply).await?;
    writer.flush().await
}

async fn close_stream<S>(stream: &mut S, peer: SocketAddr)
where
    S: AsyncWrite + Unpin,
{
    if let Err(err) = stream.shutdown().await {
        debug!(%peer, error = ?err, "error while closing connection");
    }
}

fn received_at() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, duplex};

    use super::*;
    use crate::{
        protocol::{ERR_INVALID_SCORE, ERR_MALFORMED},
        store::DurableStore,
    };

    fn peer() -> SocketAddr {
        "10.0.0.5:41000".parse().unwrap()
    }

    fn state_in(dir: &std::path::Path) -> ServerState {
        ServerState::new(DurableStore::open(dir), Duration::from_millis(200))
    }

    async fn exchange(
        state: &ServerState,
        mut client: DuplexStream,
        server: DuplexStream,
    ) -> (Outcome, Vec<u8>) {
        let read_reply = async {
            let mut reply = Vec::new();
            client.read_to_end(&mut reply).await.unwrap();
            reply
        };
        tokio::join!(handle_connection(server, peer(), state), read_reply)
    }

    #[tokio::test]
    async fn valid_request_is_stored_and_acknowledged() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_in(dir.path());
        let (mut client, server) = duplex(MAX_MESSAGE_BYTES);
        client.write_all(b"Ana Silva;3A;8.5").await.unwrap();

        let (outcome, reply) = exchange(&state, client, server).await;

        assert_eq!(outcome, Outcome::Stored);
        assert_eq!(reply, ACK);
        let stored = state.store().load_all().await.unwrap();
        let record = stored.last().expect("one record");
        assert_eq!(stored.len(), 1);
        assert_eq!(record.name, "Ana Silva");
        assert_eq!(record.class_label, "3A");
        assert_eq!(record.score, 8.5);
        assert_eq!(record.origin_address.as_deref(), Some("10.0.0.5"));
        assert_eq!(record.origin_port, Some(41000));
        assert!(record.received_at.is_some());
        assert_eq!(state.active_sessions().await, 0);
    }

    #[tokio::test]
    async fn request_is_cut_at_the_size_ceiling() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_in(dir.path());
        let (mut client, server) = duplex(2 * MAX_MESSAGE_BYTES);
        // The first 4096 bytes are a valid request; the tail would add a fourth field.
        let mut request = format!("{:<width$}", "Ana;3A;8.5", width = MAX_MESSAGE_BYTES);
        request.push_str(";extra");
        client.write_all(request.as_bytes()).await.unwrap();

        let (outcome, reply) = exchange(&state, client, server).await;

        assert_eq!(outcome, Outcome::Stored);
        assert_eq!(reply, ACK);
        let stored = state.store().load_all().await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored.last().map(|r| r.name.as_str()), Some("Ana"));
        assert_eq!(stored.last().map(|r| r.score), Some(8.5));
    }

    #[tokio::test]
    async fn request_of_exactly_the_ceiling_is_read_whole() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_in(dir.path());
        let (mut client, server) = duplex(2 * MAX_MESSAGE_BYTES);
        let suffix = ";3A;8.5";
        let name = "a".repeat(MAX_MESSAGE_BYTES - suffix.len());
        let request = format!("{name}{suffix}");
        assert_eq!(request.len(), MAX_MESSAGE_BYTES);
        client.write_all(request.as_bytes()).await.unwrap();

        let (outcome, reply) = exchange(&state, client, server).await;

        assert_eq!(outcome, Outcome::Stored);
        assert_eq!(reply, ACK);
        let stored = state.store().load_all().await.unwrap();
        let record = stored.last().expect("one record");
        assert_eq!(record.name, name);
        assert_eq!(record.class_label, "3A");
        assert_eq!(record.score, 8.5);
    }

    #[tokio::test]
    async fn malformed_request_gets_error_and_stores_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_in(dir.path());
        let (mut client, server) = duplex(MAX_MESSAGE_BYTES);
        client.write_all(b"Ana;3A").await.unwrap();

        let (outcome, reply) = exchange(&state, client, server).await;

        assert!(matches!(outcome, Outcome::Rejected(DecodeError::MalformedMessage(_))));
        assert_eq!(reply, ERR_MALFORMED.as_bytes());
        assert!(!state.store().path().exists());
    }

    #[tokio::test]
    async fn invalid_score_gets_error_and_stores_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_in(dir.path());
        let (mut client, server) = duplex(MAX_MESSAGE_BYTES);
        client.write_all(b"Ana;3A;oito").await.unwrap();

        let (outcome, reply) = exchange(&state, client, server).await;

        assert!(matches!(outcome, Outcome::Rejected(DecodeError::InvalidScore(_))));
        assert_eq!(reply, ERR_INVALID_SCORE.as_bytes());
        assert!(!state.store().path().exists());
    }

    #[tokio::test]
    async fn empty_connection_gets_no_reply() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_in(dir.path());
        let (mut client, server) = duplex(MAX_MESSAGE_BYTES);
        client.shutdown().await.unwrap();

        let (outcome, reply) = exchange(&state, client, server).await;

        assert_eq!(outcome, Outcome::Empty);
        assert!(reply.is_empty());
        assert!(!state.store().path().exists());
    }

    #[tokio::test]
    async fn silent_client_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_in(dir.path());
        let (client, server) = duplex(MAX_MESSAGE_BYTES);

        let (outcome, reply) = exchange(&state, client, server).await;

        assert_eq!(outcome, Outcome::TimedOut);
        assert!(reply.is_empty());
        assert_eq!(state.active_sessions().await, 0);
    }

    #[tokio::test]
    async fn store_failure_sends_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("occupied");
        std::fs::write(&blocker, b"").unwrap();
        let state = state_in(&blocker);
        let (mut client, server) = duplex(MAX_MESSAGE_BYTES);
        client.write_all(b"Ana;3A;8").await.unwrap();

        let (outcome, reply) = exchange(&state, client, server).await;

        assert_eq!(outcome, Outcome::StoreFailed);
        assert!(reply.is_empty());
    }
}
