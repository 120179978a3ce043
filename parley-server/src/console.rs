//! Admin console
//!
//! Line-oriented administration on the server's stdin: `logout` tears the
//! server down, anything else is broadcast as chat text from the system
//! sender. `ban`/`unban` are rejected here: blocking is per-recipient
//! muting owned by the issuing client session, and the console has no
//! session of its own to mute for.

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use parley_protocol::Message;

use crate::server::ServerState;

/// What a console line asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleAction {
    /// `logout`: shut the server down
    Shutdown,
    /// `sessions`: list active sessions
    ListSessions,
    /// Any other non-empty line: broadcast as system text
    Broadcast(String),
    /// `ban`/`unban`: unsupported on the console
    RejectBlockCommand,
    /// Blank line
    Ignore,
}

/// Interpret one console line
pub fn parse_line(line: &str) -> ConsoleAction {
    let trimmed = line.trim();

    if trimmed.is_empty() {
        ConsoleAction::Ignore
    } else if trimmed.eq_ignore_ascii_case("logout") {
        ConsoleAction::Shutdown
    } else if trimmed.eq_ignore_ascii_case("sessions") {
        ConsoleAction::ListSessions
    } else if trimmed.starts_with("ban ") || trimmed.starts_with("unban ") {
        ConsoleAction::RejectBlockCommand
    } else {
        ConsoleAction::Broadcast(trimmed.to_string())
    }
}

/// Apply a console action
///
/// Returns false when the console loop should stop.
pub fn apply_action(state: &ServerState, action: ConsoleAction) -> bool {
    match action {
        ConsoleAction::Shutdown => {
            info!("Console requested shutdown");
            state.shutdown();
            false
        }
        ConsoleAction::ListSessions => {
            let mut sessions = state.registry.snapshot();
            sessions.sort_by_key(|info| info.id);
            println!("{} active session(s)", state.registry.session_count());
            for info in sessions {
                println!("  {}  {}", info.id, info.name);
            }
            true
        }
        ConsoleAction::Broadcast(text) => {
            state.broadcaster.deliver(Message::system(text));
            true
        }
        ConsoleAction::RejectBlockCommand => {
            warn!("ban/unban are per-client commands; issue them from a client session");
            true
        }
        ConsoleAction::Ignore => true,
    }
}

/// Run the console loop until `logout` or stdin closes
pub async fn run_console(state: ServerState) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if !apply_action(&state, parse_line(&line)) {
                    break;
                }
            }
            Ok(None) => {
                info!("Console input closed");
                break;
            }
            Err(e) => {
                warn!("Console read error: {}", e);
                break;
            }
        }
    }
}
