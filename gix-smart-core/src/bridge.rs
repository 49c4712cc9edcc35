//! Adapters between the codec state machines and HTTP body streams.
//!
//! The producer side drains the [`Encoder`] into an outgoing request body
//! and can append a pre-formed byte stream, which is how an update-request
//! header and a generated pack share one POST body. The consumer side feeds
//! a chunked response body into the [`Decoder`], holding on to whatever a
//! chunk carried beyond the decoder's current demand.

use crate::decode::{self, Decoder, Step};
use crate::encode::{EncodeStep, Encoder};
use crate::error::{Error, Result};
use crate::http::ResponseBody;
use crate::message::Message;
use std::io::{self, Read};

/// An outgoing request body: the encoded message, then an optional trailer
/// stream.
///
/// Once the trailer signals end-of-stream the body stays at end, no matter
/// how often it is polled again.
pub struct RequestBody<R> {
    encoder: Encoder,
    trailer: Option<R>,
}

impl RequestBody<io::Empty> {
    /// A body carrying just the encoded message.
    pub fn new(encoder: Encoder) -> Self {
        Self { encoder, trailer: None }
    }
}

impl<R: Read> RequestBody<R> {
    /// A body carrying the encoded message followed by `trailer`.
    pub fn with_trailer(encoder: Encoder, trailer: R) -> Self {
        Self {
            encoder,
            trailer: Some(trailer),
        }
    }
}

impl<R: Read> Read for RequestBody<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        match self.encoder.step() {
            EncodeStep::Write(window) => {
                let take = window.len().min(buf.len());
                buf[..take].copy_from_slice(&window[..take]);
                self.encoder.consume(take);
                Ok(take)
            }
            EncodeStep::Done => match &mut self.trailer {
                Some(trailer) => {
                    let read = trailer.read(buf)?;
                    if read == 0 {
                        self.trailer = None;
                    }
                    Ok(read)
                }
                None => Ok(0),
            },
        }
    }
}

/// Drives a primed [`Decoder`] from one HTTP response body.
///
/// The reader copies at most the decoder's current demand per step; a chunk
/// that overshoots is retained and offered again before the body is asked
/// for more. One reader lives per response, while the decoder it drives
/// lives for the whole operation.
pub struct MessageReader<'a, B> {
    decoder: &'a mut Decoder,
    body: &'a mut B,
    leftover: Vec<u8>,
    consumed: usize,
}

impl<'a, B: ResponseBody> MessageReader<'a, B> {
    /// Couple `decoder` to `body` for the duration of one response.
    pub fn new(decoder: &'a mut Decoder, body: &'a mut B) -> Self {
        Self {
            decoder,
            body,
            leftover: Vec::new(),
            consumed: 0,
        }
    }

    /// Prime the underlying decoder for the next message of this response.
    pub fn prime(&mut self, expect: crate::decode::Expect) {
        self.decoder.expect(expect);
    }

    /// Whether the decoder holds a pushed-back line from the previous
    /// message of this response.
    pub fn has_pending_line(&self) -> bool {
        self.decoder.has_pending_line()
    }

    /// Decode the next message from the response.
    pub fn next_message(&mut self) -> Result<Message> {
        loop {
            match self.decoder.step()? {
                Step::Ok(message) => return Ok(message),
                Step::Read { .. } => {
                    if self.consumed < self.leftover.len() {
                        self.consumed += self.decoder.supply(&self.leftover[self.consumed..]);
                        continue;
                    }
                    match self.body.next_chunk()? {
                        Some(chunk) => {
                            let taken = self.decoder.supply(chunk);
                            if taken < chunk.len() {
                                self.leftover.clear();
                                self.leftover.extend_from_slice(&chunk[taken..]);
                                self.consumed = 0;
                            } else {
                                self.leftover.clear();
                                self.consumed = 0;
                            }
                        }
                        None => return Ok(self.decoder.finish()?),
                    }
                }
            }
        }
    }

    /// Decode the next message, requiring it to satisfy `extract`.
    ///
    /// Used by the drivers to insist on e.g. acks where the protocol demands
    /// them; anything else is an unexpected-message protocol error.
    pub fn expect_message<T>(
        &mut self,
        expected: &str,
        extract: impl FnOnce(Message) -> Option<T>,
    ) -> Result<T> {
        let message = self.next_message()?;
        let description = message_kind(&message);
        extract(message).ok_or_else(|| {
            Error::Smart(decode::Error::UnexpectedMessage {
                message: format!("expected {expected}, got {description}"),
            })
        })
    }

    /// Collect everything the server sent: bytes already consumed by the
    /// decoder, the retained chunk suffix, and the unread rest of the body.
    ///
    /// Used to surface a non-pkt-line error page as a readable failure.
    pub fn into_diagnostic(mut self) -> Vec<u8> {
        let mut bytes = self.decoder.diagnostic_bytes().to_vec();
        bytes.extend_from_slice(&self.leftover[self.consumed.min(self.leftover.len())..]);
        while let Ok(Some(chunk)) = self.body.next_chunk() {
            bytes.extend_from_slice(chunk);
            if bytes.len() >= 65536 {
                break;
            }
        }
        bytes
    }
}

fn message_kind(message: &Message) -> &'static str {
    match message {
        Message::Advertisement(_) => "an advertisement",
        Message::Acks(_) => "acks",
        Message::NegotiationResult(_) => "a negotiation result",
        Message::Band(_) => "a pack frame",
        Message::ReportStatus(_) => "a status report",
    }
}
