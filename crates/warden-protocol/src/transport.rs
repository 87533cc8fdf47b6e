//! Transports carrying one request and its reply per call.

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;

use warden_common::error::{Result, WardenError};

use crate::frame::{read_message, write_message};
use crate::message::{Reply, Request};

/// Client side of the channel: send a request, block for its reply.
pub trait Transport {
    /// Sends `request` and waits for the matching reply.
    ///
    /// # Errors
    ///
    /// Returns [`WardenError::Protocol`] if the exchange fails or the peer
    /// hangs up before replying.
    fn call(&mut self, request: &Request) -> Result<Reply>;
}

/// Helper side of the channel.
pub trait ServerTransport {
    /// Waits for the next request. `None` means the peer hung up.
    ///
    /// # Errors
    ///
    /// Returns an error if a malformed frame arrives or the read fails.
    fn recv(&mut self) -> Result<Option<Request>>;

    /// Sends the reply to the most recently received request.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn send(&mut self, reply: &Reply) -> Result<()>;
}

/// Framed JSON messages over a byte stream.
///
/// Replies are written in request order, which keeps pairing intact on a
/// stream without request identifiers.
#[derive(Debug)]
pub struct FramedStream<S> {
    stream: S,
}

impl<S: Read + Write> FramedStream<S> {
    /// Wraps a connected stream.
    pub const fn new(stream: S) -> Self {
        Self { stream }
    }

    /// Returns the underlying stream.
    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl FramedStream<UnixStream> {
    /// Connects to the helper's Unix socket.
    ///
    /// # Errors
    ///
    /// Returns [`WardenError::Io`] if the connection is refused.
    pub fn connect(path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(path).map_err(|e| WardenError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        tracing::debug!(socket = %path.display(), "connected to privileged helper");
        Ok(Self::new(stream))
    }
}

impl<S: Read + Write> Transport for FramedStream<S> {
    fn call(&mut self, request: &Request) -> Result<Reply> {
        write_message(&mut self.stream, request)?;
        read_message(&mut self.stream)?.ok_or_else(|| WardenError::Protocol {
            message: format!("helper closed the connection before answering {}", request.kind()),
        })
    }
}

impl<S: Read + Write> ServerTransport for FramedStream<S> {
    fn recv(&mut self) -> Result<Option<Request>> {
        read_message(&mut self.stream)
    }

    fn send(&mut self, reply: &Reply) -> Result<()> {
        write_message(&mut self.stream, reply)
    }
}
