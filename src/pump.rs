//! One loop per direction of a connection. The writer pump owns the
//! outbound FIFO queue, flushing it on a fixed tick and synthesizing a
//! keepalive whenever a tick finds the queue empty. The reader pump blocks
//! on the stream and hands each decoded message to its owner's dispatch
//! function. Closing the stream is the sole cancellation primitive: both
//! loops notice on their next read or write and return.

use std::time::Duration;

use tokio::{
    io::{AsyncBufRead, AsyncWrite},
    sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
    time,
};
use tracing::debug;

use crate::message::{read_message, write_message, Message};

/// How often the writer pump wakes to flush its queue. An idle tick sends a
/// keepalive instead, so the peer sees traffic at this cadence.
pub const FLUSH_INTERVAL: Duration = Duration::from_millis(100);

/// Producer handle for the writer pump's queue. Cloneable; enqueues never
/// block and preserve FIFO order per connection.
#[derive(Clone)]
pub struct Outbound {
    tx: UnboundedSender<Message>,
}

impl Outbound {
    /// Queues a message for the next flush tick. Once the pump has stopped
    /// the connection is dead, so the message is quietly dropped.
    pub fn enqueue(&self, message: Message) {
        if self.tx.send(message).is_err() {
            debug!("writer pump has stopped; dropping outbound message");
        }
    }
}

/// Spawns the writer pump over the write half of a stream and returns the
/// queue handle plus the pump task.
pub fn spawn_writer<W>(writer: W) -> (Outbound, JoinHandle<()>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(run_writer(writer, rx));
    (Outbound { tx }, handle)
}

async fn run_writer<W>(mut writer: W, mut queue: UnboundedReceiver<Message>)
where
    W: AsyncWrite + Unpin,
{
    let mut tick = time::interval(FLUSH_INTERVAL);
    loop {
        tick.tick().await;

        // Snapshot the queue at tick start; everything captured here goes
        // out before the next sleep, in enqueue order.
        let mut batch = Vec::new();
        let mut queue_closed = false;
        loop {
            match queue.try_recv() {
                Ok(message) => batch.push(message),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    queue_closed = true;
                    break;
                }
            }
        }

        if batch.is_empty() {
            if queue_closed {
                return;
            }
            batch.push(Message::keep_alive());
        }

        for message in &batch {
            if let Err(err) = write_message(&mut writer, message).await {
                debug!(%err, "write failed; stopping writer pump");
                return;
            }
        }

        if queue_closed {
            return;
        }
    }
}

/// Reads messages until the stream ends or errors, handing each one
/// synchronously to `dispatch` before the next read.
pub async fn run_reader<R, F>(mut reader: R, mut dispatch: F)
where
    R: AsyncBufRead + Unpin,
    F: FnMut(Message),
{
    loop {
        match read_message(&mut reader).await {
            Ok(Some(message)) => dispatch(message),
            Ok(None) => {
                debug!("peer closed the stream; stopping reader pump");
                return;
            }
            Err(err) => {
                debug!(%err, "read failed; stopping reader pump");
                return;
            }
        }
    }
}
