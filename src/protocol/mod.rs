//! Bolt client-server protocol.
//!
//! This module turns a raw byte stream into typed requests, runs them against
//! an injected [`QueryExecutor`](crate::executor::QueryExecutor), and turns the
//! results back into bytes. It is wire compatible with Bolt 4.x, so the stock
//! Neo4j drivers can talk to any backend that implements the executor trait.
//!
//! # Overview
//!
//! Every connection goes through the same pipeline:
//!
//! 1. [`negotiate`]: the client sends the magic preamble and four version
//!    proposals, the server answers with the version it speaks.
//! 2. [`ChunkedTransport`] reassembles chunked frames into whole messages.
//! 3. [`Request`] decodes a message with the [`packstream`](crate::packstream)
//!    codec and checks its shape.
//! 4. [`Session`] runs the request through the per-connection state machine,
//!    calling into the executor and the auth bridge as needed.
//! 5. [`Response`] encodes SUCCESS, RECORD, IGNORED or FAILURE and the
//!    transport writes it back as a chunked frame.
//!
//! # Binary Format
//!
//! Messages are PackStream structures split into chunks:
//!
//! - Each chunk starts with a 2 byte big-endian length, followed by that many
//!   payload bytes. Chunks hold at most 65535 bytes.
//! - A zero length chunk ends the message. A zero length chunk with nothing
//!   before it is an empty no-op message.
//! - The payload starts with a structure marker (`0xB0..=0xBF`) and a one byte
//!   [`Signature`] naming the message.
//!
//! # Key Components
//!
//! - [`BoltServer`]: accepts connections and hands each one to a pool worker.
//! - [`Session`]: the per-connection state machine.
//! - [`ChunkedTransport`]: buffered chunk reader and writer.
//!
//! # See Also
//!
//! - [`auth`](crate::auth): credential schemes and role permissions.
//! - [`executor`](crate::executor): the query engine seam.
mod handshake;
mod request;
mod response;
mod server;
mod session;
mod shaping;
mod thread;
mod transport;

use std::fmt;

use thread::ThreadPool;

pub use handshake::{BOLT_MAGIC, HandshakeError, SUPPORTED_VERSION, Version, negotiate};
pub use request::{QueryClass, Request, RequestError};
pub use response::{FailureCode, Response};
pub use server::{BoltServer, ShutdownHandle};
pub use session::{Flow, ServerContext, Session, SessionState};
pub use shaping::{NODE_ID_KEY, NODE_LABELS_KEY, shape_value};
pub use transport::{ChunkedTransport, DEFAULT_MAX_MESSAGE_SIZE, MAX_CHUNK_SIZE, TransportError};

/// One byte tag identifying a message or graph entity structure.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature(u8);

impl Signature {
    pub const HELLO: Self = Self(0x01);
    pub const GOODBYE: Self = Self(0x02);
    pub const RESET: Self = Self(0x0F);
    pub const RUN: Self = Self(0x10);
    pub const BEGIN: Self = Self(0x11);
    pub const COMMIT: Self = Self(0x12);
    pub const ROLLBACK: Self = Self(0x13);
    pub const DISCARD: Self = Self(0x2F);
    pub const PULL: Self = Self(0x3F);
    pub const ROUTE: Self = Self(0x66);

    pub const SUCCESS: Self = Self(0x70);
    pub const RECORD: Self = Self(0x71);
    pub const IGNORED: Self = Self(0x7E);
    pub const FAILURE: Self = Self(0x7F);

    pub const NODE: Self = Self(0x4E);

    pub fn name(self) -> &'static str {
        match self {
            Self::HELLO => "HELLO",
            Self::GOODBYE => "GOODBYE",
            Self::RESET => "RESET",
            Self::RUN => "RUN",
            Self::BEGIN => "BEGIN",
            Self::COMMIT => "COMMIT",
            Self::ROLLBACK => "ROLLBACK",
            Self::DISCARD => "DISCARD",
            Self::PULL => "PULL",
            Self::ROUTE => "ROUTE",
            Self::SUCCESS => "SUCCESS",
            Self::RECORD => "RECORD",
            Self::IGNORED => "IGNORED",
            Self::FAILURE => "FAILURE",
            Self::NODE => "Node",
            _ => "UNKNOWN",
        }
    }
}

impl From<u8> for Signature {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

impl From<Signature> for u8 {
    fn from(value: Signature) -> Self {
        value.0
    }
}

impl PartialEq<u8> for Signature {
    fn eq(&self, other: &u8) -> bool {
        self.0 == *other
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(0x{:02X})", self.name(), self.0)
    }
}
