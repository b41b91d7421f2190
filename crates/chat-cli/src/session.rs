//! Interactive session: stdin lines in, rendered events out.

use std::time::Duration;

use chat_connection::{ChatClient, Direction, Event};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::error::{CliError, CliResult};

/// One line of user input.
#[derive(Debug, PartialEq, Eq)]
pub enum Input {
    Say(String),
    Connect,
    Disconnect,
    Reconnect,
    /// `None` disables the inactivity timeout.
    Timeout(Option<Duration>),
    ToggleDebug,
    State,
    Quit,
}

pub fn parse_input(line: &str) -> CliResult<Input> {
    let line = line.trim();
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Input::Say(line.to_string()));
    };

    let mut parts = rest.split_whitespace();
    let input = match parts.next().unwrap_or_default() {
        "connect" => Input::Connect,
        "disconnect" => Input::Disconnect,
        "reconnect" => Input::Reconnect,
        "debug" => Input::ToggleDebug,
        "state" => Input::State,
        "quit" | "exit" => Input::Quit,
        "timeout" => {
            let value = parts
                .next()
                .ok_or_else(|| CliError::Command("/timeout needs a value in ms".to_string()))?;
            let ms: i64 = value
                .parse()
                .map_err(|_| CliError::Command(format!("/timeout: not a number: {value}")))?;
            Input::Timeout(
                u64::try_from(ms)
                    .ok()
                    .filter(|ms| *ms > 0)
                    .map(Duration::from_millis),
            )
        }
        other => return Err(CliError::Command(format!("unknown command /{other}"))),
    };
    Ok(input)
}

/// Text for one event, or `None` when the event has nothing to show.
pub fn render(event: &Event, json: bool) -> CliResult<Option<String>> {
    if json {
        return Ok(Some(serde_json::to_string(event)?));
    }
    let line = match event {
        Event::Message(m) => match m.direction {
            Direction::Inbound => format!("< {}", m.text),
            Direction::Outbound => format!("> {}", m.text),
            Direction::System => format!("* {}", m.text),
        },
        Event::StateChanged { state } => format!("[status: {state}]"),
        Event::Error { error } => format!("! {error}"),
        // Already announced by a system message.
        Event::ReconnectScheduled { .. } => return Ok(None),
    };
    Ok(Some(line))
}

pub async fn run(mut client: ChatClient, json: bool, mut debug: bool) -> CliResult<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    // The terminal input has focus from the start.
    client.focus()?;

    loop {
        tokio::select! {
            event = client.next() => {
                let Some(event) = event else {
                    tracing::warn!("connection task stopped");
                    break;
                };
                if let Some(line) = render(&event, json)? {
                    println!("{line}");
                }
            }

            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                client.touch()?;
                match parse_input(&line) {
                    Ok(Input::Quit) => break,
                    Ok(input) => apply(&client, input, &mut debug).await?,
                    Err(e) => eprintln!("{e}"),
                }
            }
        }
    }

    client.close();
    Ok(())
}

async fn apply(client: &ChatClient, input: Input, debug: &mut bool) -> CliResult<()> {
    match input {
        Input::Say(text) => client.send(text)?,
        // The outcome is rendered from the event stream.
        Input::Connect => client.request_connect()?,
        Input::Disconnect => client.disconnect()?,
        Input::Reconnect => client.reconnect()?,
        Input::Timeout(timeout) => {
            client.set_inactivity_timeout(timeout)?;
            match timeout {
                Some(t) => println!("* inactivity timeout set to {}ms", t.as_millis()),
                None => println!("* inactivity timeout disabled"),
            }
        }
        Input::ToggleDebug => {
            *debug = !*debug;
            client.set_debug(*debug)?;
            println!("* debug logging {}", if *debug { "on" } else { "off" });
        }
        Input::State => println!("[status: {}]", client.state().await?),
        Input::Quit => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chat_connection::{ConnectionConfig, ConnectionState, Error};

    use super::*;

    #[test]
    fn plain_text_is_a_message() {
        assert_eq!(
            parse_input("  hello world \n").unwrap(),
            Input::Say("hello world".to_string())
        );
        assert_eq!(parse_input("   ").unwrap(), Input::Say(String::new()));
    }

    #[test]
    fn slash_commands() {
        assert_eq!(parse_input("/connect").unwrap(), Input::Connect);
        assert_eq!(parse_input("/disconnect").unwrap(), Input::Disconnect);
        assert_eq!(parse_input("/reconnect").unwrap(), Input::Reconnect);
        assert_eq!(parse_input("/debug").unwrap(), Input::ToggleDebug);
        assert_eq!(parse_input("/state").unwrap(), Input::State);
        assert_eq!(parse_input("/quit").unwrap(), Input::Quit);
        assert!(parse_input("/bogus").is_err());
    }

    #[test]
    fn timeout_command() {
        assert_eq!(
            parse_input("/timeout 5000").unwrap(),
            Input::Timeout(Some(Duration::from_secs(5)))
        );
        assert_eq!(parse_input("/timeout 0").unwrap(), Input::Timeout(None));
        assert_eq!(parse_input("/timeout -1").unwrap(), Input::Timeout(None));
        assert!(parse_input("/timeout").is_err());
        assert!(parse_input("/timeout soon").is_err());
    }

    #[tokio::test]
    async fn connect_command_returns_before_the_attempt_settles() {
        // Accepts TCP through the backlog but never answers the upgrade.
        let silent = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = silent.local_addr().unwrap().port();
        let config = ConnectionConfig::new(&format!("ws://127.0.0.1:{port}/chat")).unwrap();
        let mut client = ChatClient::spawn(config);

        let mut debug = false;
        tokio::time::timeout(
            Duration::from_millis(500),
            apply(&client, Input::Connect, &mut debug),
        )
        .await
        .unwrap()
        .unwrap();

        let first = client.next().await.unwrap();
        assert_eq!(
            first,
            Event::StateChanged {
                state: ConnectionState::Connecting
            }
        );
        assert_eq!(client.state().await.unwrap(), ConnectionState::Connecting);
        drop(silent);
    }

    #[test]
    fn render_text() {
        let event = Event::StateChanged {
            state: ConnectionState::Connected,
        };
        assert_eq!(
            render(&event, false).unwrap().as_deref(),
            Some("[status: connected]")
        );

        let event = Event::Error {
            error: Error::RetriesExhausted { attempts: 5 },
        };
        assert_eq!(
            render(&event, false).unwrap().as_deref(),
            Some("! reconnection abandoned after 5 attempts")
        );

        let event = Event::ReconnectScheduled {
            attempt: 1,
            delay_ms: 3000,
        };
        assert_eq!(render(&event, false).unwrap(), None);
    }

    #[test]
    fn render_json() {
        let event = Event::ReconnectScheduled {
            attempt: 2,
            delay_ms: 6000,
        };
        let line = render(&event, true).unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["type"], "reconnect_scheduled");
        assert_eq!(value["attempt"], 2);
        assert_eq!(value["delay_ms"], 6000);
    }
}
