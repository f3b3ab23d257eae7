//! Accepts TCP connections and runs one handler per client.
//!
//! Each connection is served by a single task: reads, dispatch, and the
//! immediate reply all happen on the same logical owner, so the handler
//! state machine needs no locks and no writer queue. The [`Handler`] itself
//! does no I/O, which is what the unit tests exercise.

use std::future::Future;
use std::net::SocketAddr;
use std::time::SystemTime;

use anyhow::Result;
use tokio::{
    io::BufReader,
    net::{TcpListener, TcpStream},
    select,
};
use tracing::{debug, info, warn};

use crate::eval;
use crate::message::{read_message, write_message, Message, MessageKind};

pub struct Server {
    listener: TcpListener,
}

impl Server {
    pub fn new(listener: TcpListener) -> Self {
        Self { listener }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until `shutdown` completes, spawning one handler
    /// task per client.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server { listener } = self;
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!("server shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer)) => spawn_connection_handler(stream, peer),
                        Err(err) => warn!(error = ?err, "failed to accept connection"),
                    }
                }
            }
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

fn spawn_connection_handler(stream: TcpStream, peer: SocketAddr) {
    tokio::spawn(async move {
        if let Err(err) = handle_connection(stream, peer).await {
            warn!(peer = %peer, error = ?err, "client connection closed with error");
        }
    });
}

async fn handle_connection(stream: TcpStream, peer: SocketAddr) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut handler = Handler::new(peer);

    loop {
        match read_message(&mut reader).await {
            Ok(Some(message)) => {
                if let Some(reply) = handler.on_message(&message) {
                    if let Err(err) = write_message(&mut writer, &reply).await {
                        handler.on_stream_closed();
                        return Err(err.into());
                    }
                }
                if handler.is_closed() {
                    break;
                }
            }
            Ok(None) => {
                handler.on_stream_closed();
                break;
            }
            Err(err) => {
                handler.on_stream_closed();
                return Err(err.into());
            }
        }
    }

    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandlerState {
    New,
    Joined,
    Closed,
}

/// Per-connection state machine: `New` until the client joins, `Joined`
/// while it may ask questions, `Closed` once either side is done.
struct Handler {
    peer: SocketAddr,
    state: HandlerState,
    username: Option<String>,
    connected_at: Option<SystemTime>,
    disconnected_at: Option<SystemTime>,
}

impl Handler {
    fn new(peer: SocketAddr) -> Self {
        Self {
            peer,
            state: HandlerState::New,
            username: None,
            connected_at: None,
            disconnected_at: None,
        }
    }

    fn is_closed(&self) -> bool {
        self.state == HandlerState::Closed
    }

    /// Dispatches one inbound message, returning the reply to write, if
    /// any. A join from an already-joined client refreshes the username and
    /// is acknowledged again.
    fn on_message(&mut self, message: &Message) -> Option<Message> {
        match message.kind {
            MessageKind::Join => {
                self.state = HandlerState::Joined;
                self.username = Some(message.body.clone());
                self.connected_at = Some(SystemTime::now());
                info!(peer = %self.peer, username = %message.body, "client joined");
                Some(Message::join(&message.body))
            }
            MessageKind::UserText => self.reply(&message.body),
            MessageKind::Disconnect => {
                self.disconnect();
                None
            }
            MessageKind::KeepAlive => None,
            MessageKind::ServerReply | MessageKind::Other(_) => {
                debug!(peer = %self.peer, ?message, "ignoring unexpected message");
                None
            }
        }
    }

    /// Answers a question. Questions sent before a username is on record
    /// are silently ignored.
    fn reply(&self, text: &str) -> Option<Message> {
        if self.state != HandlerState::Joined {
            return None;
        }
        Some(Message::server_reply(&format!(
            "{text}={}",
            eval::solve(text)
        )))
    }

    /// Records a clean disconnect. Safe to call repeatedly: only the first
    /// transition stamps the timestamp and logs.
    fn disconnect(&mut self) {
        if self.state == HandlerState::Closed {
            return;
        }
        self.state = HandlerState::Closed;
        self.disconnected_at = Some(SystemTime::now());
        info!(
            peer = %self.peer,
            username = self.username.as_deref().unwrap_or("<unknown>"),
            "client disconnected"
        );
    }

    /// Records the stream going away without a disconnect notice.
    fn on_stream_closed(&mut self) {
        if self.state == HandlerState::Closed {
            return;
        }
        self.state = HandlerState::Closed;
        self.disconnected_at = Some(SystemTime::now());
        warn!(
            peer = %self.peer,
            username = self.username.as_deref().unwrap_or("<unknown>"),
            "connection closed without a disconnect notice"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_handler() -> Handler {
        Handler::new("127.0.0.1:8421".parse().expect("peer address"))
    }

    #[test]
    fn join_is_acknowledged_and_recorded() {
        let mut handler = test_handler();

        let ack = handler.on_message(&Message::join("alice"));
        assert_eq!(ack, Some(Message::join("alice")));
        assert_eq!(handler.state, HandlerState::Joined);
        assert_eq!(handler.username.as_deref(), Some("alice"));
        assert!(handler.connected_at.is_some());
    }

    #[test]
    fn questions_are_answered_after_join() {
        let mut handler = test_handler();
        handler.on_message(&Message::join("alice"));

        let reply = handler.on_message(&Message::user_text("5/0"));
        assert_eq!(reply, Some(Message::server_reply("5/0=NaN")));

        let reply = handler.on_message(&Message::user_text(" 3 + 4 "));
        assert_eq!(reply, Some(Message::server_reply(" 3 + 4 =7")));

        let reply = handler.on_message(&Message::user_text("not math"));
        assert_eq!(reply, Some(Message::server_reply("not math=ERROR")));
    }

    #[test]
    fn questions_before_join_are_silently_ignored() {
        let mut handler = test_handler();

        assert_eq!(handler.on_message(&Message::user_text("3+4")), None);
        assert_eq!(handler.state, HandlerState::New);
    }

    #[test]
    fn keepalive_and_unknown_kinds_are_no_ops() {
        let mut handler = test_handler();
        handler.on_message(&Message::join("alice"));

        assert_eq!(handler.on_message(&Message::keep_alive()), None);
        assert_eq!(handler.on_message(&Message::server_reply("8")), None);
        assert_eq!(
            handler.on_message(&Message::new(MessageKind::Other(9), 0, "x")),
            None
        );
        assert_eq!(handler.state, HandlerState::Joined);
    }

    #[test]
    fn disconnect_closes_and_is_idempotent() {
        let mut handler = test_handler();
        handler.on_message(&Message::join("alice"));

        assert_eq!(handler.on_message(&Message::disconnect(0, "alice")), None);
        assert!(handler.is_closed());
        let first_stamp = handler.disconnected_at;

        handler.disconnect();
        handler.on_message(&Message::disconnect(0, "alice"));
        assert_eq!(handler.disconnected_at, first_stamp);
    }

    #[test]
    fn stream_closure_marks_an_unclean_disconnect() {
        let mut handler = test_handler();
        handler.on_message(&Message::join("alice"));

        handler.on_stream_closed();
        assert!(handler.is_closed());
        let first_stamp = handler.disconnected_at;

        // A repeat closure signal must not restamp.
        handler.on_stream_closed();
        assert_eq!(handler.disconnected_at, first_stamp);
    }
}
