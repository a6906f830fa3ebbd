//! Request framing, argument escaping and response delivery.

use std::io::{self, Cursor, Read, Write};
use std::mem;
use std::os::fd::AsRawFd;
use std::os::unix::net::UnixStream;

use nix::errno::Errno;
use nix::sys::socket::{MsgFlags, recv};
use tracing::debug;

use super::request::WorkRequest;
use super::{PROTOCOL_TARGET, ProtocolError};

/// Bytes requested from the connection per read.
const RECV_LEN: usize = 4096;

/// Maximum size of a single request in bytes.
pub const MAX_REQUEST_BYTES: usize = 1024 * 1024;

const ESCAPE: char = '\\';
const SEPARATOR: char = ' ';

/// Byte source that can tell whether more input is already waiting.
pub trait FrameSource: Read {
    /// Returns `true` when bytes can be read without blocking.
    ///
    /// # Errors
    ///
    /// Propagates failures of the underlying check.
    fn has_pending(&mut self) -> io::Result<bool>;
}

impl FrameSource for UnixStream {
    fn has_pending(&mut self) -> io::Result<bool> {
        let mut byte = [0_u8; 1];
        loop {
            match recv(
                self.as_raw_fd(),
                &mut byte,
                MsgFlags::MSG_PEEK | MsgFlags::MSG_DONTWAIT,
            ) {
                Ok(read) => return Ok(read > 0),
                Err(Errno::EAGAIN) => return Ok(false),
                Err(Errno::EINTR) => {}
                Err(errno) => return Err(errno.into()),
            }
        }
    }
}

impl<T: AsRef<[u8]>> FrameSource for Cursor<T> {
    fn has_pending(&mut self) -> io::Result<bool> {
        let len = self.get_ref().as_ref().len();
        Ok(usize::try_from(self.position()).is_ok_and(|position| position < len))
    }
}

/// Reads one framed request and splits it into fields.
///
/// Reading continues until the accumulated bytes end in an odd run of
/// backslashes, i.e. the final backslash is not itself escaped, and no
/// further input is already waiting. The terminator is stripped before the
/// text is split.
///
/// A buffer ending in an odd run is also the prefix of a longer request whose
/// last field ends in an escaped backslash. Bytes that have already arrived
/// settle the question; a client must therefore send each request in a single
/// write and then wait for the reply.
///
/// # Errors
///
/// Fails with a malformed-request error when the stream ends before a
/// terminator, the message is too large or not UTF-8, and with
/// [`ProtocolError::Io`] when reading fails.
pub fn decode<R: FrameSource>(reader: &mut R) -> Result<WorkRequest, ProtocolError> {
    let raw = read_message(reader)?;
    let text = String::from_utf8(raw)?;
    Ok(WorkRequest::new(split_fields(&text)))
}

/// Frames fields as a request: escapes, joins with spaces and terminates.
///
/// An empty field list is indistinguishable from a single empty field.
#[must_use]
pub fn encode<S: AsRef<str>>(fields: &[S]) -> Vec<u8> {
    let mut message = fields
        .iter()
        .map(|field| escape(field.as_ref()))
        .collect::<Vec<_>>()
        .join(" ");
    message.push(ESCAPE);
    message.into_bytes()
}

/// Writes response text until every byte is accepted by the peer.
///
/// # Errors
///
/// Returns [`ProtocolError::ConnectionBroken`] when a write makes no progress.
pub fn send<W: Write + ?Sized>(writer: &mut W, text: &str) -> Result<(), ProtocolError> {
    send_bytes(writer, text.as_bytes())
}

/// Byte-oriented form of [`send`], used for captured process output.
///
/// # Errors
///
/// Returns [`ProtocolError::ConnectionBroken`] when a write makes no progress.
pub fn send_bytes<W: Write + ?Sized>(writer: &mut W, bytes: &[u8]) -> Result<(), ProtocolError> {
    let mut remaining = bytes;
    while !remaining.is_empty() {
        let sent = match writer.write(remaining) {
            Ok(sent) => sent,
            Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
            Err(error) => return Err(error.into()),
        };
        if sent == 0 {
            return Err(ProtocolError::ConnectionBroken);
        }
        remaining = remaining.get(sent..).unwrap_or_default();
    }
    writer.flush()?;
    Ok(())
}

fn read_message<R: FrameSource>(reader: &mut R) -> Result<Vec<u8>, ProtocolError> {
    let mut buffer = Vec::new();
    let mut chunk = [0_u8; RECV_LEN];
    loop {
        let read = read_with_retry(reader, &mut chunk)?;
        if read == 0 {
            debug!(target: PROTOCOL_TARGET, received = buffer.len(), "stream ended");
            return Err(if buffer.is_empty() {
                ProtocolError::EmptyMessage
            } else {
                ProtocolError::Truncated {
                    received: buffer.len(),
                }
            });
        }

        buffer.extend_from_slice(chunk.get(..read).unwrap_or_default());
        if buffer.len() > MAX_REQUEST_BYTES {
            return Err(ProtocolError::TooLarge {
                max_size: MAX_REQUEST_BYTES,
            });
        }

        if ends_with_terminator(&buffer) && !reader.has_pending()? {
            buffer.pop();
            return Ok(buffer);
        }
    }
}

fn read_with_retry<R: Read>(reader: &mut R, chunk: &mut [u8]) -> io::Result<usize> {
    loop {
        match reader.read(chunk) {
            Ok(read) => return Ok(read),
            Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
            Err(error) => return Err(error),
        }
    }
}

/// An odd run of trailing backslashes ends with an unescaped one.
fn ends_with_terminator(buffer: &[u8]) -> bool {
    let trailing = buffer
        .iter()
        .rev()
        .take_while(|byte| **byte == b'\\')
        .count();
    trailing % 2 == 1
}

fn split_fields(text: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars();
    while let Some(ch) = chars.next() {
        match ch {
            ESCAPE => match chars.next() {
                Some(escaped @ (SEPARATOR | ESCAPE)) => current.push(escaped),
                // Unknown escapes are kept verbatim.
                Some(other) => {
                    current.push(ESCAPE);
                    current.push(other);
                }
                None => current.push(ESCAPE),
            },
            SEPARATOR => fields.push(mem::take(&mut current)),
            other => current.push(other),
        }
    }
    fields.push(current);
    fields
}

fn escape(field: &str) -> String {
    let mut escaped = String::with_capacity(field.len());
    for ch in field.chars() {
        if matches!(ch, SEPARATOR | ESCAPE) {
            escaped.push(ESCAPE);
        }
        escaped.push(ch);
    }
    escaped
}
