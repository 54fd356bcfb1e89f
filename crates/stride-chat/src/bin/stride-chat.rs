//! Terminal chat client.
//!
//! Usage: `stride-chat <user-id> [counterparty]`
//!
//! Lines typed on stdin go to the current counterparty. Commands:
//! `/to <user>`, `/show [user]`, `/who`, `/quit`.

use anyhow::{Context, bail};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use stride_chat::{ChatConfig, ChatSession, MessageCodec, PayloadProtection};
use stride_crypto::keys::import_symmetric_key;
use stride_types::Envelope;

const USAGE: &str = "commands: /to <user>, /show [user], /who, /quit";

/// One trimmed, non-empty stdin line.
#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Quit,
    To(&'a str),
    Who,
    Show(Option<&'a str>),
    /// A malformed or unknown command. Never sent as chat text.
    Usage,
    Text(&'a str),
}

impl<'a> Input<'a> {
    fn parse(line: &'a str) -> Self {
        if !line.starts_with('/') {
            return Input::Text(line);
        }
        let (cmd, arg) = line.split_once(' ').unwrap_or((line, ""));
        let arg = arg.trim();
        match cmd {
            "/quit" => Input::Quit,
            "/to" if !arg.is_empty() => Input::To(arg),
            "/who" => Input::Who,
            "/show" => Input::Show((!arg.is_empty()).then_some(arg)),
            _ => Input::Usage,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stride_chat=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut args = std::env::args().skip(1);
    let Some(local_user) = args.next() else {
        bail!("usage: stride-chat <user-id> [counterparty]");
    };
    let mut counterparty = args.next();

    let config = ChatConfig::from_env()?;
    let protection = match std::env::var("STRIDE_SHARED_KEY") {
        Ok(encoded) => {
            let key = import_symmetric_key(encoded.trim()).context("STRIDE_SHARED_KEY")?;
            PayloadProtection::SharedKey(key)
        }
        Err(_) => {
            warn!("STRIDE_SHARED_KEY not set, messages go out as plaintext");
            PayloadProtection::None
        }
    };

    let session = ChatSession::over_websocket(local_user.clone(), MessageCodec::new(protection), config);

    let me = local_user.clone();
    session.subscribe(move |envelope: &Envelope| {
        if envelope.sender() != me {
            println!("[{}] {}", envelope.sender(), envelope.content());
        }
    });

    session.start().await?;
    info!("signed in as {}", local_user);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match Input::parse(line) {
            Input::Quit => break,
            Input::To(user) => counterparty = Some(user.to_string()),
            Input::Who => {
                for user in session.counterparties() {
                    println!("  {}", user);
                }
            }
            Input::Show(user) => {
                let Some(user) = user.map(str::to_string).or_else(|| counterparty.clone()) else {
                    println!("no counterparty; use /to <user>");
                    continue;
                };
                for envelope in session.conversation(&user) {
                    println!("[{}] {}", envelope.sender(), envelope.content());
                }
            }
            Input::Usage => println!("{}", USAGE),
            Input::Text(text) => {
                let Some(to) = counterparty.as_deref() else {
                    println!("no counterparty; use /to <user>");
                    continue;
                };
                if !session.send_text(to, text).await {
                    println!("(not sent)");
                }
            }
        }
    }

    session.stop().await;
    Ok(())
}
