//! Line-protocol math service: a client joins a server, submits two-operand
//! arithmetic questions, and reads back the answers.
//!
//! Every frame is one newline-delimited ASCII line with a two-digit prefix
//! (message kind, then a single auxiliary digit) followed by the body. See
//! `README.md` for the wire format and usage. Each module focuses on a
//! concrete responsibility:
//!
//! - [`cli`] parses the command-line interface for server and client modes.
//! - [`message`] provides the digit-prefixed line codec plus helpers for
//!   async reads and writes.
//! - [`eval`] validates and computes `<digits><op><digits>` expressions.
//! - [`pump`] owns the outbound queue with its periodic flush/keepalive
//!   loop, and the inbound read-and-dispatch loop.
//! - [`client`] drives one outbound connection: join handshake, interactive
//!   send loop, graceful disconnect.
//! - [`server`] accepts TCP connections and runs one handler state machine
//!   per client.
//!
//! Integration and unit tests use this crate directly to exercise the
//! handler state machine and the wire protocol.

pub mod cli;
pub mod client;
pub mod eval;
pub mod message;
pub mod pump;
pub mod server;
