//! Interactive console loop.
//!
//! Each input line becomes one message:
//! - `exit;` ends the session without sending anything,
//! - `<act> <json>` sends `<json>` on action `<act>`,
//! - anything else is sent on the default action as a JSON string.

use tcpmux_client::Client;
use tcpmux_protocol::Message;
use tcpmux_protocol::constants::ACT_DEFAULT;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{info, warn};

const EXIT_COMMAND: &str = "exit;";
const PANIC_PAYLOAD: &str = "panic;";

/// A parsed console line.
#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    Exit,
    Send(Message),
}

/// Parses one console line. Blank lines yield `None`.
pub fn parse_line(line: &str) -> Result<Option<Command>, serde_json::Error> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    if line == EXIT_COMMAND {
        return Ok(Some(Command::Exit));
    }

    if let Some((act, json)) = line.split_once(char::is_whitespace) {
        let json = json.trim();
        if let Ok(act) = act.parse::<u16>() {
            if serde_json::from_str::<serde_json::Value>(json).is_ok() {
                return Ok(Some(Command::Send(Message::raw(act, json.to_owned()))));
            }
        }
    }

    Message::new(ACT_DEFAULT, &line).map(|msg| Some(Command::Send(msg)))
}

/// Prints a message pushed by the server.
///
/// A `"panic;"` payload panics on purpose; the client contains it and only
/// loses the connection.
pub fn print_message(msg: Message) {
    if msg.parse_payload::<String>().is_ok_and(|text| text == PANIC_PAYLOAD) {
        panic!("panic by user");
    }
    println!("[{}] {}", msg.act, msg.payload_lossy());
}

/// Reads lines from `input` and sends them until `exit;`, end of input, or
/// the connection closes. Closes the client before returning.
pub async fn run<R>(client: &Client, input: R) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    let result = loop {
        let line = tokio::select! {
            _ = client.closed() => {
                info!("connection closed");
                break Ok(());
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => line,
                Ok(None) => break Ok(()),
                Err(e) => break Err(e.into()),
            },
        };

        match parse_line(&line) {
            Ok(None) => {}
            Ok(Some(Command::Exit)) => {
                info!("exit requested");
                break Ok(());
            }
            Ok(Some(Command::Send(msg))) => {
                if let Err(e) = client.send(&msg) {
                    warn!("send failed: {e}");
                    break Ok(());
                }
            }
            Err(e) => warn!("invalid input: {e}"),
        }
    };

    client.close();
    result
}
