//! The request encoder: renders negotiation and update requests into
//! pkt-line form, draining through explicit write steps.
//!
//! Mirroring the decoder, the encoder owns no I/O. [`Encoder::step`] hands
//! out the next window of bytes and [`Encoder::consume`] advances past
//! whatever the transport managed to write, so partial writes never lose
//! protocol state.

use crate::message::{Command, Terminator, UpdateRequest, UploadRequest};
use gix_hash::{Kind, ObjectId};

/// The outcome of driving the encoder one step.
#[derive(Debug, PartialEq, Eq)]
pub enum EncodeStep<'a> {
    /// Bytes ready to go out; advance with [`Encoder::consume`].
    Write(&'a [u8]),
    /// The message is fully encoded.
    Done,
}

/// A primed request encoder.
pub struct Encoder {
    buf: Vec<u8>,
    pos: usize,
}

impl Encoder {
    /// Encode one fetch negotiation round.
    ///
    /// Wire shape: want lines (capabilities on the first), shallow lines, an
    /// optional deepen line, a flush, have lines, then either `done` or a
    /// closing flush depending on the terminator.
    pub fn upload_request(request: &UploadRequest, terminator: Terminator) -> Self {
        let mut buf = Vec::new();
        let caps = request.capabilities.to_wire();
        for (index, want) in request.wants.iter().enumerate() {
            if index == 0 && !request.capabilities.is_empty() {
                data_pkt(&mut buf, &[b"want ", hex(want).as_bytes(), b" ", caps.as_slice(), b"\n"]);
            } else {
                data_pkt(&mut buf, &[b"want ", hex(want).as_bytes(), b"\n"]);
            }
        }
        for shallow in &request.shallow {
            data_pkt(&mut buf, &[b"shallow ", hex(shallow).as_bytes(), b"\n"]);
        }
        if let Some(depth) = request.deepen {
            data_pkt(&mut buf, &[b"deepen ", depth.to_string().as_bytes(), b"\n"]);
        }
        flush_pkt(&mut buf);
        for have in &request.haves {
            data_pkt(&mut buf, &[b"have ", hex(have).as_bytes(), b"\n"]);
        }
        match terminator {
            Terminator::Done => data_pkt(&mut buf, &[b"done\n"]),
            Terminator::Flush => flush_pkt(&mut buf),
        }
        Self { buf, pos: 0 }
    }

    /// Encode a push update-request header; the pack stream follows it on
    /// the same body.
    ///
    /// Wire shape: shallow lines, command lines (capabilities after a NUL on
    /// the first), then a flush. `Create` and `Delete` use the all-zero id
    /// for their missing side.
    pub fn update_request(request: &UpdateRequest) -> Self {
        let mut buf = Vec::new();
        let caps = request.capabilities.to_wire();
        for shallow in &request.shallow {
            data_pkt(&mut buf, &[b"shallow ", hex(shallow).as_bytes(), b"\n"]);
        }
        for (index, command) in request.commands.iter().enumerate() {
            let (old, new) = command_ids(command);
            if index == 0 {
                data_pkt(
                    &mut buf,
                    &[
                        hex(&old).as_bytes(),
                        b" ",
                        hex(&new).as_bytes(),
                        b" ",
                        command.name().as_slice(),
                        b"\0",
                        caps.as_slice(),
                        b"\n",
                    ],
                );
            } else {
                data_pkt(
                    &mut buf,
                    &[
                        hex(&old).as_bytes(),
                        b" ",
                        hex(&new).as_bytes(),
                        b" ",
                        command.name().as_slice(),
                        b"\n",
                    ],
                );
            }
        }
        flush_pkt(&mut buf);
        Self { buf, pos: 0 }
    }

    /// The next window of bytes to write, or [`EncodeStep::Done`].
    pub fn step(&self) -> EncodeStep<'_> {
        if self.pos < self.buf.len() {
            EncodeStep::Write(&self.buf[self.pos..])
        } else {
            EncodeStep::Done
        }
    }

    /// Advance past `n` written bytes.
    pub fn consume(&mut self, n: usize) {
        self.pos = (self.pos + n).min(self.buf.len());
    }
}

fn command_ids(command: &Command) -> (ObjectId, ObjectId) {
    let zero = ObjectId::null(Kind::Sha1);
    match command {
        Command::Create { new, .. } => (zero, *new),
        Command::Delete { old, .. } => (*old, zero),
        Command::Update { old, new, .. } => (*old, *new),
    }
}

fn hex(id: &ObjectId) -> String {
    id.to_hex().to_string()
}

/// Append one data pkt-line assembled from `parts`.
fn data_pkt(buf: &mut Vec<u8>, parts: &[&[u8]]) {
    let payload_len: usize = parts.iter().map(|part| part.len()).sum();
    buf.extend_from_slice(format!("{:04x}", payload_len + 4).as_bytes());
    for part in parts {
        buf.extend_from_slice(part);
    }
}

fn flush_pkt(buf: &mut Vec<u8>) {
    buf.extend_from_slice(b"0000");
}
