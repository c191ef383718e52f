//! Interactive session loop.

use std::time::Duration;

use relay_client::{RelayClient, RelayEvent};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

/// How long to wait for a clean disconnect on Ctrl-C or end of input.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// A line typed by the user.
#[derive(Debug, PartialEq, Eq)]
enum Input {
    Send { payload: String, pinned: bool },
    Pause,
    Reconnect,
    Leave,
    End,
}

fn parse_input(line: &str) -> Option<Input> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.is_empty() {
        return None;
    }

    let input = match line {
        "/pause" => Input::Pause,
        "/reconnect" => Input::Reconnect,
        "/leave" => Input::Leave,
        "/end" => Input::End,
        _ => match line.strip_prefix("/pin ") {
            Some(payload) => Input::Send {
                payload: payload.to_string(),
                pinned: true,
            },
            None => Input::Send {
                payload: line.to_string(),
                pinned: false,
            },
        },
    };
    Some(input)
}

/// Drive `client` until its session closes, the input ends or Ctrl-C.
pub async fn run_session(client: RelayClient) -> anyhow::Result<()> {
    let mut events = client.subscribe();
    print_json(&client.state());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(RelayEvent::StateChanged(state)) => {
                    print_json(&state);
                    if state.is_closed() {
                        info!(local_id = %client.local_id(), reason = ?state.disconnect_reason, "Session closed");
                        return Ok(());
                    }
                }
                Ok(RelayEvent::MessageReceived(message)) => print_json(&message),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event stream lagged");
                    print_json(&client.state());
                }
                Err(RecvError::Closed) => return Ok(()),
            },
            line = lines.next_line() => match line? {
                Some(line) => match parse_input(&line) {
                    Some(Input::Send { payload, pinned }) => client.send(payload, pinned),
                    Some(Input::Pause) => client.pause(),
                    Some(Input::Reconnect) => client.reconnect(),
                    Some(Input::Leave) => client.disconnect(false),
                    Some(Input::End) => client.disconnect(true),
                    None => {}
                },
                None => return shutdown(&client).await,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, leaving session");
                return shutdown(&client).await;
            }
        }
    }
}

async fn shutdown(client: &RelayClient) -> anyhow::Result<()> {
    client.disconnect(false);
    match tokio::time::timeout(SHUTDOWN_TIMEOUT, client.wait_for(|s| s.is_closed())).await {
        Ok(result) => {
            result?;
        }
        Err(_) => warn!(local_id = %client.local_id(), "Timed out waiting for disconnect"),
    }
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(json) => println!("{json}"),
        Err(e) => warn!(error = %e, "Failed to encode output"),
    }
}
