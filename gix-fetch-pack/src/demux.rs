//! Side-band demultiplexing of the pack phase.
//!
//! [`PackStream`] splits the decoded band frames into pack bytes handed to
//! the store, progress forwarded to a user sink, and server errors forwarded
//! to an error sink while also being aggregated for diagnostics. Sink writes
//! complete before the next decode step runs, so a slow sink exerts
//! backpressure on the transfer.

use gix_smart_core::bridge::MessageReader;
use gix_smart_core::decode::Expect;
use gix_smart_core::error::Error;
use gix_smart_core::http::ResponseBody;
use gix_smart_core::message::{BandFrame, Message};
use gix_smart_core::SideBandMode;
use std::collections::VecDeque;
use std::io::{self, Read, Write};

/// Where progress and server error output goes during a transfer.
pub struct Sinks<'a> {
    /// Receives progress frames (conventionally the user's stderr).
    pub progress: &'a mut dyn Write,
    /// Receives server error frames.
    pub errors: &'a mut dyn Write,
}

/// The pack substream of a demultiplexed response, readable by the store.
///
/// Frames are copied into an internal queue before the store sees them; the
/// source buffers belong to the HTTP client and may be reused. Decode and
/// transport failures are parked in [`PackStream::take_failure`] because the
/// `Read` contract can only carry opaque I/O errors.
pub struct PackStream<'a, 'r, B> {
    reader: MessageReader<'r, B>,
    sinks: Sinks<'a>,
    queue: VecDeque<Vec<u8>>,
    offset: usize,
    server_error: Vec<u8>,
    failure: Option<Error>,
    done: bool,
}

impl<'a, 'r, B: ResponseBody> PackStream<'a, 'r, B> {
    /// Start the pack phase on `reader` in the given side-band mode.
    pub fn new(mut reader: MessageReader<'r, B>, mode: SideBandMode, sinks: Sinks<'a>) -> Self {
        reader.prime(Expect::Pack(mode));
        Self {
            reader,
            sinks,
            queue: VecDeque::new(),
            offset: 0,
            server_error: Vec::new(),
            failure: None,
            done: false,
        }
    }

    /// The failure that ended the stream early, if any.
    ///
    /// Checked by the driver after ingestion; it outranks whatever error the
    /// store reported for the truncated stream.
    pub fn take_failure(&mut self) -> Option<Error> {
        self.failure.take()
    }

    /// The aggregated error-channel output, if the server sent any.
    pub fn server_error(&self) -> Option<String> {
        if self.server_error.is_empty() {
            return None;
        }
        let text = String::from_utf8_lossy(&self.server_error);
        Some(text.trim_end_matches(['\r', '\n']).to_string())
    }

    /// Whether the stream reached its end frame.
    pub fn finished(&self) -> bool {
        self.done && self.queue.is_empty()
    }

    /// Pull frames until pack data is queued or the stream ends.
    fn pump(&mut self) -> io::Result<()> {
        while self.queue.is_empty() && !self.done {
            let frame = match self.reader.next_message() {
                Ok(Message::Band(frame)) => frame,
                Ok(other) => {
                    let err = Error::sync(format!("expected a pack frame, got {other:?}"));
                    return Err(self.park(err));
                }
                Err(err) => return Err(self.park(err)),
            };
            match frame {
                BandFrame::Data(data) => {
                    if !data.is_empty() {
                        self.queue.push_back(data);
                    }
                }
                BandFrame::Progress(data) => {
                    if let Err(err) = self.sinks.progress.write_all(&data) {
                        let err = Error::sync(format!("progress sink failed: {err}"));
                        return Err(self.park(err));
                    }
                }
                BandFrame::Error(data) => {
                    self.server_error.extend_from_slice(&data);
                    if let Err(err) = self.sinks.errors.write_all(&data) {
                        let err = Error::sync(format!("error sink failed: {err}"));
                        return Err(self.park(err));
                    }
                }
                BandFrame::End => self.done = true,
            }
        }
        Ok(())
    }

    fn park(&mut self, err: Error) -> io::Error {
        let opaque = io::Error::new(io::ErrorKind::Other, err.to_string());
        self.failure = Some(err);
        opaque
    }
}

impl<B: ResponseBody> Read for PackStream<'_, '_, B> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.pump()?;
        let Some(front) = self.queue.front() else {
            return Ok(0);
        };
        let available = &front[self.offset..];
        let take = available.len().min(buf.len());
        buf[..take].copy_from_slice(&available[..take]);
        self.offset += take;
        if self.offset == front.len() {
            self.queue.pop_front();
            self.offset = 0;
        }
        Ok(take)
    }
}
