//! Per-connection dispatcher
//!
//! One task per accepted connection: performs the Join handshake, admits
//! the session, then loops over inbound frames, the session's outbound
//! queue, and the shutdown signal. Every exit path removes the session
//! from the registry and releases the connection.

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::{debug, info};

use parley_protocol::{codec::CodecError, Message, MessageCodec, MessageKind};
use parley_utils::{ParleyError, Result};

use crate::server::ServerState;
use crate::session::{SessionId, SessionState};

/// Drive one client connection from accept to close
pub async fn handle_client(stream: TcpStream, peer_addr: SocketAddr, state: ServerState) {
    let mut session_state = SessionState::Connecting;

    // Subscribe before admission so a shutdown signaled mid-handshake is
    // either seen on the channel or via the flag check below.
    let mut shutdown_rx = state.subscribe_shutdown();

    let framed = Framed::new(stream, MessageCodec::new());
    let (mut sink, mut inbound) = framed.split();

    let handshake_timeout = Duration::from_secs(state.config.server.handshake_timeout_secs);
    let name = match read_handshake(&mut inbound, handshake_timeout).await {
        Ok(name) => name,
        Err(e) => {
            debug!("Handshake from {} failed: {}", peer_addr, e);
            session_state.advance(SessionState::Closing);
            let _ = sink.close().await;
            session_state.advance(SessionState::Closed);
            return;
        }
    };

    let (outbound_tx, mut outbound_rx) = mpsc::channel(state.config.server.outbound_capacity);
    let id = match state.registry.admit(&name, outbound_tx.clone()) {
        Ok(id) => id,
        Err(e) => {
            info!("Rejected '{}' from {}: {}", name, peer_addr, e);
            session_state.advance(SessionState::Closing);
            let _ = sink.send(Message::system(format!("cannot join: {}", e))).await;
            let _ = sink.close().await;
            session_state.advance(SessionState::Closed);
            return;
        }
    };

    if state.is_shutting_down() {
        // Shutdown raced the handshake; do not strand the session
        state.registry.remove(id);
        session_state.advance(SessionState::Closing);
        let _ = sink.send(Message::shutdown()).await;
        let _ = sink.close().await;
        session_state.advance(SessionState::Closed);
        return;
    }

    session_state.advance(SessionState::Active);
    info!("{} joined as '{}' from {}", id, name, peer_addr);

    loop {
        tokio::select! {
            Some(msg) = outbound_rx.recv() => {
                if let Err(e) = sink.send(msg).await {
                    debug!("Write to {} failed: {}", id, e);
                    break;
                }
            }
            frame = inbound.next() => {
                match frame {
                    Some(Ok(msg)) => {
                        if !dispatch_message(&state, id, &name, &outbound_tx, msg) {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        debug!("Read from {} failed: {}", id, e);
                        break;
                    }
                    None => {
                        debug!("{} disconnected", id);
                        break;
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                // Flush whatever is queued, the shutdown notice included
                while let Ok(msg) = outbound_rx.try_recv() {
                    if sink.send(msg).await.is_err() {
                        break;
                    }
                }
                break;
            }
        }
    }

    session_state.advance(SessionState::Closing);
    state.registry.remove(id);
    let _ = sink.close().await;
    session_state.advance(SessionState::Closed);
    debug_assert!(session_state.is_terminal());
    info!("{} ('{}') closed", id, name);
}

/// Read the single Join frame that opens every connection
async fn read_handshake<S>(inbound: &mut S, limit: Duration) -> Result<String>
where
    S: Stream<Item = std::result::Result<Message, CodecError>> + Unpin,
{
    let frame = timeout(limit, inbound.next())
        .await
        .map_err(|_| ParleyError::HandshakeTimeout {
            seconds: limit.as_secs(),
        })?;

    let msg = match frame {
        Some(Ok(msg)) => msg,
        Some(Err(e)) => return Err(ParleyError::protocol(e.to_string())),
        None => return Err(ParleyError::ConnectionClosed),
    };

    if msg.kind != MessageKind::Join {
        return Err(ParleyError::InvalidMessage(format!(
            "expected Join handshake, got {}",
            msg.kind
        )));
    }
    if msg.payload.is_empty() {
        return Err(ParleyError::InvalidMessage("empty display name".into()));
    }

    Ok(msg.payload)
}

/// Handle one inbound frame from an active session
///
/// Returns false when the session should leave the loop (logout).
fn dispatch_message(
    state: &ServerState,
    id: SessionId,
    name: &str,
    outbound: &mpsc::Sender<Message>,
    msg: Message,
) -> bool {
    match msg.kind {
        MessageKind::Text => {
            if let Some(rest) = msg.payload.strip_prefix("ban ") {
                handle_block_command(state, id, name, outbound, rest, true);
            } else if let Some(rest) = msg.payload.strip_prefix("unban ") {
                handle_block_command(state, id, name, outbound, rest, false);
            } else {
                // The registry is the identity authority: the inbound
                // sender_id field is ignored and restamped.
                state
                    .broadcaster
                    .deliver(Message::text(id.value(), msg.payload));
            }
            true
        }
        MessageKind::Logout => {
            info!("{} ('{}') logged out", id, name);
            false
        }
        // Join after admission and client-sent Shutdown have no effect
        MessageKind::Join | MessageKind::Shutdown => {
            debug!("Ignoring {} from {}", msg.kind, id);
            true
        }
    }
}

/// Apply `ban <id>` / `unban <id>` against the issuer's own block set
///
/// The mutation is announced to everyone; a malformed id is reported to
/// the issuer only.
fn handle_block_command(
    state: &ServerState,
    id: SessionId,
    name: &str,
    outbound: &mpsc::Sender<Message>,
    rest: &str,
    block: bool,
) {
    match parse_target(rest) {
        Some(target) => {
            let notice = if block {
                state.registry.block(id, target);
                format!("{} now blocks session {}", name, target)
            } else {
                state.registry.unblock(id, target);
                format!("{} no longer blocks session {}", name, target)
            };
            state.broadcaster.deliver(Message::system(notice));
        }
        None => {
            let verb = if block { "ban" } else { "unban" };
            let reply = Message::system(format!("invalid command, use '{} <id>'", verb));
            if outbound.try_send(reply).is_err() {
                debug!("Could not queue error reply for {}", id);
            }
        }
    }
}

/// Parse the id operand of a block command
fn parse_target(rest: &str) -> Option<i32> {
    rest.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    use parley_protocol::SYSTEM_SENDER_ID;

    use crate::config::AppConfig;
    use crate::server::{bind, run_accept_loop};

    type ClientFramed = Framed<TcpStream, MessageCodec>;

    /// Spin up a full server on an ephemeral port
    async fn start_server() -> (ServerState, SocketAddr) {
        let mut config = AppConfig::default();
        config.server.handshake_timeout_secs = 1;
        let state = ServerState::new(config);

        let listener = bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let loop_state = state.clone();
        tokio::spawn(async move {
            run_accept_loop(listener, loop_state).await;
        });

        (state, addr)
    }

    /// Connect and send the Join handshake
    async fn connect(addr: SocketAddr, name: &str) -> ClientFramed {
        let stream = TcpStream::connect(addr).await.unwrap();
        let mut framed = Framed::new(stream, MessageCodec::new());
        framed.send(Message::join(name)).await.unwrap();
        framed
    }

    /// Receive the next frame or panic after two seconds
    async fn recv(framed: &mut ClientFramed) -> Message {
        timeout(Duration::from_secs(2), framed.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .expect("decode failed")
    }

    /// Assert nothing arrives within 300ms
    async fn assert_silent(framed: &mut ClientFramed) {
        let result = timeout(Duration::from_millis(300), framed.next()).await;
        assert!(result.is_err(), "expected silence, got {:?}", result);
    }

    /// Poll until the registry holds exactly `count` sessions
    async fn wait_for_sessions(state: &ServerState, count: usize) {
        for _ in 0..200 {
            if state.registry.session_count() == count {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "registry never reached {} sessions (has {})",
            count,
            state.registry.session_count()
        );
    }

    #[test]
    fn test_parse_target() {
        assert_eq!(parse_target("3"), Some(3));
        assert_eq!(parse_target(" 42 "), Some(42));
        assert_eq!(parse_target("-1"), Some(-1));
        assert_eq!(parse_target("abc"), None);
        assert_eq!(parse_target(""), None);
        assert_eq!(parse_target("1 2"), None);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_everyone_including_sender() {
        let (state, addr) = start_server().await;

        let mut a = connect(addr, "alice").await;
        wait_for_sessions(&state, 1).await;
        let mut b = connect(addr, "bob").await;
        wait_for_sessions(&state, 2).await;

        a.send(Message::text(0, "hi")).await.unwrap();

        for client in [&mut a, &mut b] {
            let msg = recv(client).await;
            assert_eq!(msg.sender_id, 1, "server stamps the sender id");
            assert_eq!(msg.payload, "hi");
        }
    }

    #[tokio::test]
    async fn test_ban_silences_sender_for_banner_only() {
        let (state, addr) = start_server().await;

        // alice=1, bob=2, carol=3
        let mut a = connect(addr, "alice").await;
        wait_for_sessions(&state, 1).await;
        let mut b = connect(addr, "bob").await;
        wait_for_sessions(&state, 2).await;
        let mut c = connect(addr, "carol").await;
        wait_for_sessions(&state, 3).await;

        a.send(Message::text(0, "hi")).await.unwrap();
        for client in [&mut a, &mut b, &mut c] {
            let msg = recv(client).await;
            assert_eq!(msg.sender_id, 1);
            assert_eq!(msg.payload, "hi");
        }

        b.send(Message::text(0, "ban 1")).await.unwrap();
        for client in [&mut a, &mut b, &mut c] {
            let msg = recv(client).await;
            assert_eq!(msg.sender_id, SYSTEM_SENDER_ID);
            assert_eq!(msg.payload, "bob now blocks session 1");
        }

        a.send(Message::text(0, "hi2")).await.unwrap();
        assert_eq!(recv(&mut a).await.payload, "hi2");
        assert_eq!(recv(&mut c).await.payload, "hi2");
        assert_silent(&mut b).await;
    }

    #[tokio::test]
    async fn test_unban_restores_delivery() {
        let (state, addr) = start_server().await;

        let mut a = connect(addr, "alice").await;
        wait_for_sessions(&state, 1).await;
        let mut b = connect(addr, "bob").await;
        wait_for_sessions(&state, 2).await;

        b.send(Message::text(0, "ban 1")).await.unwrap();
        assert_eq!(recv(&mut a).await.payload, "bob now blocks session 1");
        assert_eq!(recv(&mut b).await.payload, "bob now blocks session 1");

        b.send(Message::text(0, "unban 1")).await.unwrap();
        assert_eq!(recv(&mut a).await.payload, "bob no longer blocks session 1");
        assert_eq!(recv(&mut b).await.payload, "bob no longer blocks session 1");

        a.send(Message::text(0, "audible")).await.unwrap();
        assert_eq!(recv(&mut b).await.payload, "audible");
    }

    #[tokio::test]
    async fn test_malformed_ban_replies_to_issuer_only() {
        let (state, addr) = start_server().await;

        let mut a = connect(addr, "alice").await;
        wait_for_sessions(&state, 1).await;
        let mut b = connect(addr, "bob").await;
        wait_for_sessions(&state, 2).await;

        b.send(Message::text(0, "ban zero")).await.unwrap();

        let msg = recv(&mut b).await;
        assert_eq!(msg.sender_id, SYSTEM_SENDER_ID);
        assert!(msg.payload.contains("ban <id>"));

        assert_silent(&mut a).await;
        // bob is still active
        assert_eq!(state.registry.session_count(), 2);
    }

    #[tokio::test]
    async fn test_bare_ban_word_is_ordinary_text() {
        let (state, addr) = start_server().await;

        let mut a = connect(addr, "alice").await;
        wait_for_sessions(&state, 1).await;
        let mut b = connect(addr, "bob").await;
        wait_for_sessions(&state, 2).await;

        a.send(Message::text(0, "ban")).await.unwrap();
        assert_eq!(recv(&mut b).await.payload, "ban");
    }

    #[tokio::test]
    async fn test_name_conflict_rejected_and_closed() {
        let (state, addr) = start_server().await;

        let _first = connect(addr, "dave").await;
        wait_for_sessions(&state, 1).await;

        let mut second = connect(addr, "dave").await;
        let msg = recv(&mut second).await;
        assert_eq!(msg.sender_id, SYSTEM_SENDER_ID);
        assert!(msg.payload.contains("already in use"));

        // Connection is closed after the rejection notice
        let end = timeout(Duration::from_secs(2), second.next()).await.unwrap();
        assert!(end.is_none());
        assert_eq!(state.registry.session_count(), 1);
    }

    #[tokio::test]
    async fn test_simultaneous_same_name_handshakes_one_winner() {
        let (state, addr) = start_server().await;

        let (first, second) = tokio::join!(connect(addr, "dave"), connect(addr, "dave"));
        wait_for_sessions(&state, 1).await;

        let mut rejections = 0;
        for mut framed in [first, second] {
            match timeout(Duration::from_millis(500), framed.next()).await {
                Ok(Some(Ok(msg))) => {
                    assert!(msg.payload.contains("already in use"));
                    rejections += 1;
                }
                Ok(_) => rejections += 1,
                // The winner hears nothing
                Err(_) => {}
            }
        }

        assert_eq!(rejections, 1);
        let snapshot = state.registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].name, "dave");
    }

    #[tokio::test]
    async fn test_logout_removes_session() {
        let (state, addr) = start_server().await;

        let mut a = connect(addr, "alice").await;
        wait_for_sessions(&state, 1).await;

        a.send(Message::logout(0)).await.unwrap();
        wait_for_sessions(&state, 0).await;
        assert!(state.registry.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_transport_failure_isolated_to_one_session() {
        let (state, addr) = start_server().await;

        let mut a = connect(addr, "alice").await;
        wait_for_sessions(&state, 1).await;
        let b = connect(addr, "bob").await;
        wait_for_sessions(&state, 2).await;

        // bob's transport dies without a Logout
        drop(b);
        wait_for_sessions(&state, 1).await;

        // alice is undisturbed
        a.send(Message::text(0, "still here")).await.unwrap();
        assert_eq!(recv(&mut a).await.payload, "still here");
    }

    #[tokio::test]
    async fn test_handshake_must_be_join() {
        let (state, addr) = start_server().await;

        let stream = TcpStream::connect(addr).await.unwrap();
        let mut framed = Framed::new(stream, MessageCodec::new());
        framed.send(Message::text(0, "not a handshake")).await.unwrap();

        let end = timeout(Duration::from_secs(2), framed.next()).await.unwrap();
        assert!(end.is_none());
        assert_eq!(state.registry.session_count(), 0);
    }

    #[tokio::test]
    async fn test_handshake_empty_name_rejected() {
        let (state, addr) = start_server().await;

        let mut framed = connect(addr, "").await;
        let end = timeout(Duration::from_secs(2), framed.next()).await.unwrap();
        assert!(end.is_none());
        assert_eq!(state.registry.session_count(), 0);
    }

    #[tokio::test]
    async fn test_silent_connection_times_out() {
        let (state, addr) = start_server().await;

        let stream = TcpStream::connect(addr).await.unwrap();
        let mut framed = Framed::new(stream, MessageCodec::new());

        // Handshake timeout is 1s in the test config
        let end = timeout(Duration::from_secs(3), framed.next()).await.unwrap();
        assert!(end.is_none());
        assert_eq!(state.registry.session_count(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_notifies_all_connected_clients() {
        let (state, addr) = start_server().await;

        let mut a = connect(addr, "alice").await;
        wait_for_sessions(&state, 1).await;
        let mut b = connect(addr, "bob").await;
        wait_for_sessions(&state, 2).await;
        let mut c = connect(addr, "carol").await;
        wait_for_sessions(&state, 3).await;

        state.shutdown();

        for client in [&mut a, &mut b, &mut c] {
            let msg = recv(client).await;
            assert_eq!(msg.kind, MessageKind::Shutdown);
            let end = timeout(Duration::from_secs(2), client.next()).await.unwrap();
            assert!(end.is_none(), "connection must be closed after Shutdown");
        }

        assert!(state.registry.snapshot().is_empty());

        // Calling shutdown again is a no-op
        state.shutdown();
        assert!(state.registry.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_client_sent_shutdown_and_join_ignored() {
        let (state, addr) = start_server().await;

        let mut a = connect(addr, "alice").await;
        wait_for_sessions(&state, 1).await;

        a.send(Message::shutdown()).await.unwrap();
        a.send(Message::join("other")).await.unwrap();
        a.send(Message::text(0, "still chatting")).await.unwrap();

        assert_eq!(recv(&mut a).await.payload, "still chatting");
        assert_eq!(state.registry.session_count(), 1);
        assert!(!state.is_shutting_down());
    }
}
