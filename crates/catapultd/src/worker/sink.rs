//! Per-request output capture.

use std::io::{self, Write};

use tracing::debug;

use crate::protocol::{self, ProtocolError};

use super::WORKER_TARGET;

/// Collects everything a handler writes during one request.
///
/// Every chunk is logged at `debug`. Chunks reach the client only in verbose
/// mode; error lines are delivered regardless. The sink borrows the
/// connection, so it cannot outlive the request.
pub struct OutputSink<'s, W: Write> {
    client: &'s mut W,
    verbose: bool,
    captured: usize,
}

impl<'s, W: Write> OutputSink<'s, W> {
    /// Wraps the client connection for one request.
    pub fn new(client: &'s mut W, verbose: bool) -> Self {
        Self {
            client,
            verbose,
            captured: 0,
        }
    }

    /// Bytes written by the handler so far.
    #[must_use]
    pub fn captured(&self) -> usize {
        self.captured
    }

    /// Sends an error line to the client, whatever the verbosity.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] when the client connection is gone.
    pub fn deliver_error(&mut self, text: &str) -> Result<(), ProtocolError> {
        protocol::send(&mut *self.client, text)
    }
}

impl<W: Write> Write for OutputSink<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        debug!(
            target: WORKER_TARGET,
            output = %String::from_utf8_lossy(buf),
            "captured output"
        );
        self.captured += buf.len();
        if self.verbose {
            protocol::send_bytes(&mut *self.client, buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.verbose {
            self.client.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(true, "progress\nError\n")]
    #[case(false, "Error\n")]
    fn forwards_output_only_when_verbose(#[case] verbose: bool, #[case] expected: &str) {
        let mut client = Vec::new();
        {
            let mut sink = OutputSink::new(&mut client, verbose);
            writeln!(sink, "progress").expect("write");
            sink.deliver_error("Error\n").expect("deliver");
            assert_eq!(sink.captured(), "progress\n".len());
        }
        assert_eq!(String::from_utf8(client).expect("utf8"), expected);
    }
}
