use std::io;

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::warn;

const LINE_ENDINGS: &[char] = &['\n', '\r'];

/// Clean-disconnect reason code carried in the `meta` digit of a
/// [`MessageKind::Disconnect`] frame.
pub const REASON_CLEAN: u8 = 0;

/// Role of a message on the wire, encoded as the first digit of a line.
///
/// Digits outside the five recognized values still decode (as [`Other`]) so
/// the codec round-trips them, but dispatch treats them as unknown.
///
/// [`Other`]: MessageKind::Other
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Join,
    Disconnect,
    UserText,
    KeepAlive,
    ServerReply,
    Other(u8),
}

impl MessageKind {
    pub fn from_digit(digit: u8) -> Self {
        match digit {
            1 => MessageKind::Join,
            2 => MessageKind::Disconnect,
            3 => MessageKind::UserText,
            4 => MessageKind::KeepAlive,
            5 => MessageKind::ServerReply,
            other => MessageKind::Other(other),
        }
    }

    pub fn digit(self) -> u8 {
        match self {
            MessageKind::Join => 1,
            MessageKind::Disconnect => 2,
            MessageKind::UserText => 3,
            MessageKind::KeepAlive => 4,
            MessageKind::ServerReply => 5,
            MessageKind::Other(other) => other,
        }
    }
}

/// One frame of the line protocol: a kind digit, a single auxiliary digit,
/// and the rest of the line as the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub kind: MessageKind,
    pub meta: u8,
    pub body: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("line too short for a kind+meta prefix")]
    TooShort,
    #[error("line prefix is not two ASCII digits")]
    NonDigitPrefix,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncodeError {
    #[error("kind digit {0} is out of range 0..=9")]
    KindOutOfRange(u8),
    #[error("meta {0} does not fit in a single digit")]
    MetaOutOfRange(u8),
    #[error("body must not contain a newline")]
    BodyContainsNewline,
}

impl Message {
    pub fn new(kind: MessageKind, meta: u8, body: impl Into<String>) -> Self {
        Self {
            kind,
            meta,
            body: body.into(),
        }
    }

    /// Join request (client to server) or join acknowledgment (server to
    /// client); the body carries the username.
    pub fn join(username: &str) -> Self {
        Self::new(MessageKind::Join, 0, username)
    }

    /// Disconnect notice; `reason` rides in the meta digit and the body
    /// carries the username.
    pub fn disconnect(reason: u8, username: &str) -> Self {
        Self::new(MessageKind::Disconnect, reason, username)
    }

    pub fn user_text(text: &str) -> Self {
        Self::new(MessageKind::UserText, 0, text)
    }

    pub fn keep_alive() -> Self {
        Self::new(MessageKind::KeepAlive, 0, "")
    }

    pub fn server_reply(text: &str) -> Self {
        Self::new(MessageKind::ServerReply, 0, text)
    }

    /// Parses one line (without its terminator) into a message.
    pub fn decode(line: &str) -> Result<Self, DecodeError> {
        let mut chars = line.chars();
        let (kind, meta) = match (chars.next(), chars.next()) {
            (Some(kind), Some(meta)) => (kind, meta),
            _ => return Err(DecodeError::TooShort),
        };
        let kind = kind.to_digit(10).ok_or(DecodeError::NonDigitPrefix)? as u8;
        let meta = meta.to_digit(10).ok_or(DecodeError::NonDigitPrefix)? as u8;

        // Both prefix chars are ASCII digits, so the body starts at byte 2.
        Ok(Self {
            kind: MessageKind::from_digit(kind),
            meta,
            body: line[2..].to_string(),
        })
    }

    /// Renders the message as its wire line, without the terminator.
    pub fn encode(&self) -> Result<String, EncodeError> {
        let kind = self.kind.digit();
        if kind > 9 {
            return Err(EncodeError::KindOutOfRange(kind));
        }
        if self.meta > 9 {
            return Err(EncodeError::MetaOutOfRange(self.meta));
        }
        if self.body.contains('\n') {
            return Err(EncodeError::BodyContainsNewline);
        }

        let mut line = String::with_capacity(2 + self.body.len());
        line.push((b'0' + kind) as char);
        line.push((b'0' + self.meta) as char);
        line.push_str(&self.body);
        Ok(line)
    }
}

/// Reads the next decodable message from the stream.
///
/// Empty lines are skipped and malformed lines are logged and dropped, so a
/// framing error never tears down the connection. Returns `Ok(None)` at end
/// of stream.
pub async fn read_message<R>(reader: &mut R) -> io::Result<Option<Message>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        let bytes = reader.read_line(&mut line).await?;
        if bytes == 0 {
            return Ok(None);
        }

        let trimmed = line.trim_end_matches(LINE_ENDINGS);
        if trimmed.is_empty() {
            continue;
        }

        match Message::decode(trimmed) {
            Ok(message) => return Ok(Some(message)),
            Err(err) => warn!(%err, line = trimmed, "dropping malformed line"),
        }
    }
}

/// Encodes a message, appends the line terminator, and flushes so the peer
/// sees it promptly.
pub async fn write_message<W>(writer: &mut W, message: &Message) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut encoded = message
        .encode()
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?
        .into_bytes();
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_kinds_round_trip() {
        let messages = [
            Message::join("alice"),
            Message::disconnect(REASON_CLEAN, "alice"),
            Message::user_text("3+4"),
            Message::keep_alive(),
            Message::server_reply("3+4=7"),
        ];
        for message in messages {
            let encoded = message.encode().expect("encode");
            assert_eq!(Message::decode(&encoded).expect("decode"), message);
        }
    }

    #[test]
    fn unknown_kind_round_trips() {
        let message = Message::new(MessageKind::Other(7), 9, "payload");
        let encoded = message.encode().expect("encode");
        assert_eq!(encoded, "79payload");
        assert_eq!(Message::decode(&encoded).expect("decode"), message);
    }

    #[test]
    fn decode_rejects_short_lines() {
        assert_eq!(Message::decode(""), Err(DecodeError::TooShort));
        assert_eq!(Message::decode("5"), Err(DecodeError::TooShort));
    }

    #[test]
    fn decode_rejects_non_digit_prefix() {
        assert_eq!(Message::decode("ab"), Err(DecodeError::NonDigitPrefix));
        assert_eq!(Message::decode("1xhello"), Err(DecodeError::NonDigitPrefix));
    }

    #[test]
    fn decode_splits_prefix_and_body() {
        let message = Message::decode("13hello").expect("decode");
        assert_eq!(message.kind, MessageKind::Join);
        assert_eq!(message.meta, 3);
        assert_eq!(message.body, "hello");
    }

    #[test]
    fn encode_rejects_contract_violations() {
        let oversized_meta = Message::new(MessageKind::Disconnect, 10, "alice");
        assert_eq!(
            oversized_meta.encode(),
            Err(EncodeError::MetaOutOfRange(10))
        );

        let embedded_newline = Message::user_text("two\nlines");
        assert_eq!(
            embedded_newline.encode(),
            Err(EncodeError::BodyContainsNewline)
        );

        let bad_kind = Message::new(MessageKind::Other(12), 0, "");
        assert_eq!(bad_kind.encode(), Err(EncodeError::KindOutOfRange(12)));
    }

    #[tokio::test]
    async fn read_message_skips_blank_and_malformed_lines() {
        let (mut writer, reader) = tokio::io::duplex(1024);
        let mut reader = tokio::io::BufReader::new(reader);

        writer
            .write_all(b"\nnot a frame\n303+4\n")
            .await
            .expect("write lines");
        drop(writer);

        let message = read_message(&mut reader)
            .await
            .expect("read message")
            .expect("expected message");
        assert_eq!(message, Message::user_text("3+4"));

        let end = read_message(&mut reader).await.expect("read at eof");
        assert_eq!(end, None);
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let (mut writer, reader) = tokio::io::duplex(1024);
        let mut reader = tokio::io::BufReader::new(reader);
        let message = Message::server_reply("6/4=1");

        write_message(&mut writer, &message)
            .await
            .expect("write message");
        let parsed = read_message(&mut reader)
            .await
            .expect("read message")
            .expect("expected message");

        assert_eq!(message, parsed);
    }
}
