//! Wire format spoken between clients and workers.
//!
//! ## Requests
//!
//! A request is a single message of UTF-8 text: fields separated by spaces and
//! terminated by one unescaped trailing backslash. Spaces and backslashes that
//! belong to a field are escaped with a backslash.
//!
//! ```text
//! /home/user/corpus -m lexicon.annotate in\ file.txt out.txt\
//! ```
//!
//! The first field is always the caller's working directory. The second is
//! either `PING`, the module-mode marker `-m` followed by a registered work
//! identifier, or a script path.
//!
//! A message ending in an odd run of backslashes is complete only if no more
//! bytes are already waiting, since it may still be the prefix of a field that
//! ends in an escaped backslash. Clients send each request in one write.
//!
//! ## Responses
//!
//! Responses are unframed text. The worker writes captured output (verbose
//! mode only) and error lines, then closes the connection; end of stream marks
//! the end of the response. A `PING` is always answered with exactly `PONG`.

mod codec;
mod errors;
mod request;

pub use self::codec::{FrameSource, MAX_REQUEST_BYTES, decode, encode, send, send_bytes};
pub use self::errors::ProtocolError;
pub use self::request::{MODULE_MARKER, PING, PONG, Request, WorkOrder, WorkRequest};

pub(crate) const PROTOCOL_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::protocol");
