//! Client side of a session: dial, join, chat, disconnect.
//!
//! The connection gets one task per direction. The writer pump carries the
//! join request, user text, and the final disconnect notice; the reader
//! pump flips the join-acknowledged flag and prints server replies. The
//! session itself walks connect → awaiting-ack → active → disconnecting,
//! and ends as soon as the server side goes away.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::{Context, Result};
use thiserror::Error;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    net::TcpStream,
    select,
    time::sleep,
};
use tracing::{debug, info};

use crate::{
    cli::ClientArgs,
    message::{Message, MessageKind, REASON_CLEAN},
    pump,
};

/// Line the user types to disconnect.
const DISCONNECT_SENTINEL: &str = "#";
/// How often the connecting loop re-checks the join-acknowledged flag.
const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Poll attempts before the handshake is abandoned (10 s total).
const JOIN_POLL_LIMIT: u32 = 100;
/// Grace period for the disconnect notice to flush before the stream closes.
const DISCONNECT_GRACE: Duration = Duration::from_millis(200);

/// The server never acknowledged the join within the retry budget.
#[derive(Debug, Error)]
#[error("timed out waiting for the server to acknowledge the join")]
pub struct ConnectTimeout;

pub async fn run(args: ClientArgs) -> Result<()> {
    let stream = TcpStream::connect(args.server)
        .await
        .with_context(|| format!("failed to connect to {}", args.server))?;
    info!("connected to {}", args.server);

    let (read_half, write_half) = stream.into_split();
    let (outbound, writer_pump) = pump::spawn_writer(write_half);

    let joined = Arc::new(AtomicBool::new(false));
    let ack_flag = Arc::clone(&joined);
    let mut reader_pump = tokio::spawn(pump::run_reader(
        BufReader::new(read_half),
        move |message| dispatch(message, &ack_flag),
    ));

    outbound.enqueue(Message::join(&args.username));
    println!("*** connecting to {}", args.server);

    if let Err(err) = await_join_ack(&joined, JOIN_POLL_INTERVAL, JOIN_POLL_LIMIT).await {
        // Close the stream without ever entering the interactive loop.
        reader_pump.abort();
        drop(outbound);
        let _ = writer_pump.await;
        return Err(err.into());
    }
    println!("*** connected as {}", args.username);

    let mut stdin = BufReader::new(tokio::io::stdin());
    let mut input = String::new();
    let mut clean_disconnect = false;

    loop {
        input.clear();
        select! {
            _ = &mut reader_pump => {
                println!("*** server closed the connection");
                break;
            }
            bytes_read = stdin.read_line(&mut input) => {
                let bytes_read = bytes_read.context("failed to read user input")?;
                let text = input.trim_end_matches(['\r', '\n']);
                if bytes_read == 0 || text == DISCONNECT_SENTINEL {
                    outbound.enqueue(Message::disconnect(REASON_CLEAN, &args.username));
                    clean_disconnect = true;
                    break;
                }
                if text.is_empty() {
                    continue;
                }
                outbound.enqueue(Message::user_text(text));
            }
        }
    }

    if clean_disconnect {
        // Leave the pump a couple of flush ticks to get the notice out.
        sleep(DISCONNECT_GRACE).await;
        println!("*** disconnected");
    }

    reader_pump.abort();
    drop(outbound);
    let _ = writer_pump.await;

    Ok(())
}

/// Reader-side dispatch: a join acknowledgment flips the shared flag, and
/// server replies go straight to the user's terminal.
fn dispatch(message: Message, joined: &AtomicBool) {
    match message.kind {
        MessageKind::Join => joined.store(true, Ordering::Release),
        MessageKind::ServerReply => println!("{}", message.body),
        _ => debug!(?message, "ignoring message from server"),
    }
}

/// Polls the join-acknowledged flag until it is set or the retry budget
/// runs out.
async fn await_join_ack(
    joined: &AtomicBool,
    poll_interval: Duration,
    attempts: u32,
) -> Result<(), ConnectTimeout> {
    for attempt in 0..attempts {
        if joined.load(Ordering::Acquire) {
            return Ok(());
        }
        debug!(attempt, "waiting for join acknowledgment");
        sleep(poll_interval).await;
    }
    if joined.load(Ordering::Acquire) {
        return Ok(());
    }
    Err(ConnectTimeout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_ack_dispatch_sets_the_flag() {
        let joined = AtomicBool::new(false);

        dispatch(Message::keep_alive(), &joined);
        assert!(!joined.load(Ordering::Acquire));

        dispatch(Message::join("alice"), &joined);
        assert!(joined.load(Ordering::Acquire));
    }

    #[tokio::test]
    async fn ack_set_by_another_task_ends_the_poll_loop() {
        let joined = Arc::new(AtomicBool::new(false));
        let setter = Arc::clone(&joined);
        tokio::spawn(async move {
            sleep(Duration::from_millis(20)).await;
            setter.store(true, Ordering::Release);
        });

        await_join_ack(&joined, Duration::from_millis(5), 100)
            .await
            .expect("flag observed before the budget ran out");
    }

    #[tokio::test]
    async fn exhausted_retry_budget_is_a_connect_timeout() {
        let joined = AtomicBool::new(false);
        let result = await_join_ack(&joined, Duration::from_millis(1), 3).await;
        assert!(result.is_err());
    }
}
