//! Client connection and interactive loop

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::debug;

use parley_protocol::{Message, MessageCodec, MessageKind, SYSTEM_SENDER_ID};
use parley_utils::{ParleyError, Result};

pub type ClientFramed = Framed<TcpStream, MessageCodec>;

/// Connect to the server and register the display name
///
/// The server replies implicitly: it either keeps the connection open or
/// sends a rejection notice and closes it, which surfaces in [`run`].
pub async fn connect(host: &str, port: u16, name: &str) -> Result<ClientFramed> {
    let stream = TcpStream::connect((host, port)).await.map_err(|e| {
        ParleyError::connection(format!("Failed to connect to {}:{}: {}", host, port, e))
    })?;

    let mut framed = Framed::new(stream, MessageCodec::new());
    framed
        .send(Message::join(name))
        .await
        .map_err(|e| ParleyError::protocol(e.to_string()))?;

    Ok(framed)
}

/// Render an incoming frame for the terminal
///
/// Returns None for frames with nothing to show.
pub fn format_incoming(msg: &Message) -> Option<String> {
    match msg.kind {
        MessageKind::Text if msg.sender_id == SYSTEM_SENDER_ID => {
            Some(format!("* {}", msg.payload))
        }
        MessageKind::Text => Some(format!("[{}] {}", msg.sender_id, msg.payload)),
        MessageKind::Shutdown => Some("* server is shutting down".into()),
        MessageKind::Join | MessageKind::Logout => None,
    }
}

/// Interactive loop: stdin lines out, received frames printed
///
/// The literal line `logout` (or stdin closing) sends a Logout and exits;
/// a received Shutdown or a closed connection also ends the loop.
pub async fn run(mut framed: ClientFramed) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line? {
                    None => {
                        let _ = framed.send(Message::logout(SYSTEM_SENDER_ID)).await;
                        break;
                    }
                    Some(line) if line.trim().eq_ignore_ascii_case("logout") => {
                        let _ = framed.send(Message::logout(SYSTEM_SENDER_ID)).await;
                        break;
                    }
                    Some(line) if !line.trim().is_empty() => {
                        // The server stamps the real sender id on delivery
                        framed
                            .send(Message::text(SYSTEM_SENDER_ID, line))
                            .await
                            .map_err(|e| ParleyError::protocol(e.to_string()))?;
                    }
                    Some(_) => {}
                }
            }
            frame = framed.next() => {
                match frame {
                    Some(Ok(msg)) => {
                        debug!("Received {} from {}", msg.kind, msg.sender_id);
                        if let Some(text) = format_incoming(&msg) {
                            println!("{}", text);
                        }
                        if msg.kind == MessageKind::Shutdown {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        return Err(ParleyError::protocol(e.to_string()));
                    }
                    None => {
                        println!("server closed the connection");
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}
