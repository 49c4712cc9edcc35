//! The response decoder: an explicit state machine driven by byte supply.
//!
//! The decoder never touches I/O. It announces how many bytes it needs via
//! [`Step::Read`], accepts at most that many through [`Decoder::supply`],
//! and eventually yields a typed [`Message`]. Because the state (including
//! an internal line pushback used at negotiation round boundaries) lives in
//! the decoder itself, a single instance can be primed again and again and
//! carried across the HTTP responses of one fetch.

use crate::capabilities::{CapabilitySet, MultiAckMode, SideBandMode};
use crate::message::{
    Acks, AckStatus, BandFrame, Message, NegotiationResult, Ref, RefAdvertisement, RefStatus, ReportStatus,
};
use crate::service::Service;
use bstr::{BString, ByteSlice};
use gix_hash::ObjectId;

/// The largest pkt-line frame, header included.
const MAX_FRAME_LEN: usize = 65520;
/// How much raw pack data to request per step when side-band is off.
const MAX_RAW_CHUNK: usize = 65536;
/// Upper bound on retained diagnostic bytes.
const MAX_DIAGNOSTIC: usize = 65536;

/// Result type alias for decoding.
pub type Result<T> = std::result::Result<T, Error>;

/// Frame- and message-level decoding failures.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The four length bytes were not a valid pkt-line header.
    #[error("invalid packet line length header {header:?}")]
    InvalidLengthHeader {
        /// The offending header bytes, lossily decoded.
        header: String,
    },

    /// A structurally valid frame carried an unexpected payload.
    #[error("unexpected message: {message}")]
    UnexpectedMessage {
        /// What was received, and what was expected instead.
        message: String,
    },

    /// A line carried a malformed object id.
    #[error("invalid object id in {line:?}")]
    InvalidObjectId {
        /// The offending line, lossily decoded.
        line: String,
    },

    /// A side-band frame used a channel outside 1..=3.
    #[error("invalid side-band channel {channel}")]
    InvalidChannel {
        /// The channel byte received.
        channel: u8,
    },

    /// The input ended while the decoder still expected bytes.
    #[error("unexpected end of input")]
    UnexpectedEndOfInput,

    /// The server sent an `ERR` line or an error-channel message.
    #[error("remote error: {0}")]
    Server(String),

    /// The decoder was stepped without being primed for a message.
    #[error("decoder was not primed for a message")]
    Unprimed,
}

impl Error {
    fn unexpected(message: impl Into<String>) -> Self {
        Error::UnexpectedMessage {
            message: message.into(),
        }
    }
}

/// What the decoder should parse next.
#[derive(Debug, Clone)]
pub enum Expect {
    /// The `info/refs` advertisement for the given service.
    ReferenceDiscovery(Service),
    /// The acknowledgements of one negotiation round.
    Negotiation(MultiAckMode),
    /// The single `ACK`/`NAK` line closing a negotiation.
    NegotiationResult,
    /// The pack phase in the given side-band mode; yields one
    /// [`BandFrame`] per completed step until [`BandFrame::End`].
    Pack(SideBandMode),
    /// The report-status response to a push for the given refs.
    ReportStatus {
        /// The refnames a report may legitimately mention.
        refs: Vec<BString>,
        /// The side-band mode the response is wrapped in.
        mode: SideBandMode,
    },
}

/// The outcome of driving the decoder one step.
#[derive(Debug)]
pub enum Step {
    /// Up to `max` further bytes are needed via [`Decoder::supply`].
    Read {
        /// The most the decoder will accept right now.
        max: usize,
    },
    /// A complete message was decoded.
    Ok(Message),
}

/// The primed message family; used to dispatch without borrowing `expect`.
#[derive(Clone, Copy)]
enum Kind {
    Discovery,
    Negotiation,
    NegotiationResult,
    Pack,
    Report,
    Unprimed,
}

/// One complete pkt-line frame.
enum Frame {
    Flush,
    Delimiter,
    ResponseEnd,
    Data(Vec<u8>),
}

#[derive(Default)]
struct DiscoveryPartial {
    service: Option<Service>,
    announced: bool,
    announce_flushed: bool,
    caps_taken: bool,
    advertisement: RefAdvertisement,
}

#[derive(Default)]
struct ReportPartial {
    refs: Vec<BString>,
    mode: SideBandMode,
    inner: Vec<u8>,
    inner_pos: usize,
    inner_flushed: bool,
    unpack: Option<std::result::Result<(), String>>,
    commands: Vec<(BString, RefStatus)>,
}

enum Partial {
    None,
    Discovery(DiscoveryPartial),
    Acks(Acks),
    Report(ReportPartial),
}

/// The streaming response decoder.
pub struct Decoder {
    expect: Option<Expect>,
    partial: Partial,
    /// Unparsed input; holds at most one frame because `supply` caps its
    /// intake at the current demand.
    buf: Vec<u8>,
    /// A complete data line handed back by the negotiation parser, consumed
    /// by the next primed message before any new input.
    pushback: Option<Vec<u8>>,
    /// Recently consumed raw bytes, kept for error diagnostics.
    tail: Vec<u8>,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder {
    /// Create an unprimed decoder.
    pub fn new() -> Self {
        Self {
            expect: None,
            partial: Partial::None,
            buf: Vec::new(),
            pushback: None,
            tail: Vec::new(),
        }
    }

    /// Prime the decoder for the next message.
    ///
    /// Any pushed-back line survives priming; buffered frame bytes and
    /// diagnostics do not carry over between messages.
    pub fn expect(&mut self, expect: Expect) {
        self.partial = match &expect {
            Expect::ReferenceDiscovery(service) => Partial::Discovery(DiscoveryPartial {
                service: Some(*service),
                ..Default::default()
            }),
            Expect::Negotiation(_) => Partial::Acks(Acks::default()),
            Expect::ReportStatus { refs, mode } => Partial::Report(ReportPartial {
                refs: refs.clone(),
                mode: *mode,
                ..Default::default()
            }),
            Expect::NegotiationResult | Expect::Pack(_) => Partial::None,
        };
        self.expect = Some(expect);
        self.tail.clear();
    }

    /// Bytes consumed since the last priming, for error diagnostics.
    pub fn diagnostic_bytes(&self) -> &[u8] {
        &self.tail
    }

    /// Whether a pushed-back line is waiting to be re-read by the next
    /// primed message.
    pub fn has_pending_line(&self) -> bool {
        self.pushback.is_some()
    }

    /// Accept up to the currently demanded number of bytes.
    ///
    /// Returns how many bytes were copied; the caller keeps the unconsumed
    /// suffix and offers it again at the next [`Step::Read`].
    pub fn supply(&mut self, input: &[u8]) -> usize {
        let want = self.wanted();
        let take = want.min(input.len());
        if take == 0 {
            return 0;
        }
        self.buf.extend_from_slice(&input[..take]);
        if !self.raw_mode() && self.tail.len() < MAX_DIAGNOSTIC {
            let room = MAX_DIAGNOSTIC - self.tail.len();
            self.tail.extend_from_slice(&input[..take.min(room)]);
        }
        take
    }

    /// Tell the decoder the input ended.
    ///
    /// Legitimate only where the protocol ends a stream by closing the body:
    /// the raw (no side-band) pack phase, and a report-status that lacked a
    /// closing flush. Everywhere else this is [`Error::UnexpectedEndOfInput`].
    pub fn finish(&mut self) -> Result<Message> {
        if !self.buf.is_empty() && !self.raw_mode() {
            return Err(Error::UnexpectedEndOfInput);
        }
        match self.expect.take() {
            Some(Expect::Pack(SideBandMode::None)) => Ok(Message::Band(BandFrame::End)),
            Some(Expect::ReportStatus { .. }) => match std::mem::replace(&mut self.partial, Partial::None) {
                Partial::Report(report) => finish_report(report),
                _ => Err(Error::UnexpectedEndOfInput),
            },
            _ => Err(Error::UnexpectedEndOfInput),
        }
    }

    /// Drive the state machine one step.
    pub fn step(&mut self) -> Result<Step> {
        loop {
            if self.expect.is_none() {
                return Err(Error::Unprimed);
            }

            if self.raw_mode() {
                if self.buf.is_empty() {
                    return Ok(Step::Read { max: MAX_RAW_CHUNK });
                }
                let chunk = std::mem::take(&mut self.buf);
                return Ok(Step::Ok(Message::Band(BandFrame::Data(chunk))));
            }

            if let Some(line) = self.pushback.take() {
                if let Some(message) = self.on_line(&line)? {
                    return Ok(Step::Ok(message));
                }
                continue;
            }

            match self.parse_frame()? {
                None => {
                    return Ok(Step::Read { max: self.wanted() });
                }
                Some(Frame::Data(payload)) => {
                    if let Some(message) = self.on_line(&payload)? {
                        return Ok(Step::Ok(message));
                    }
                }
                Some(Frame::Flush) => {
                    if let Some(message) = self.on_flush()? {
                        return Ok(Step::Ok(message));
                    }
                }
                Some(Frame::Delimiter) | Some(Frame::ResponseEnd) => {
                    return Err(Error::unexpected("delimiter packet outside protocol v2"));
                }
            }
        }
    }

    fn raw_mode(&self) -> bool {
        matches!(self.expect, Some(Expect::Pack(SideBandMode::None)))
    }

    /// How many more bytes the decoder will accept right now.
    fn wanted(&self) -> usize {
        if self.raw_mode() {
            return MAX_RAW_CHUNK.saturating_sub(self.buf.len());
        }
        if self.buf.len() < 4 {
            return 4 - self.buf.len();
        }
        match frame_len(&self.buf[..4]) {
            Some(len) if len >= 4 => len.saturating_sub(self.buf.len()),
            // Special packets and malformed headers are resolved by `step`.
            _ => 0,
        }
    }

    /// Extract one complete frame from the buffer, if available.
    fn parse_frame(&mut self) -> Result<Option<Frame>> {
        if self.buf.len() < 4 {
            return Ok(None);
        }
        let len = frame_len(&self.buf[..4]).ok_or_else(|| Error::InvalidLengthHeader {
            header: self.buf[..4].as_bstr().to_string(),
        })?;
        match len {
            0 => {
                self.buf.drain(..4);
                Ok(Some(Frame::Flush))
            }
            1 => {
                self.buf.drain(..4);
                Ok(Some(Frame::Delimiter))
            }
            2 => {
                self.buf.drain(..4);
                Ok(Some(Frame::ResponseEnd))
            }
            3 => Err(Error::InvalidLengthHeader {
                header: self.buf[..4].as_bstr().to_string(),
            }),
            len if len > MAX_FRAME_LEN => Err(Error::InvalidLengthHeader {
                header: self.buf[..4].as_bstr().to_string(),
            }),
            len => {
                if self.buf.len() < len {
                    return Ok(None);
                }
                let payload = self.buf[4..len].to_vec();
                self.buf.drain(..len);
                Ok(Some(Frame::Data(payload)))
            }
        }
    }

    /// The primed message family, detached from the borrow of `expect`.
    fn kind(&self) -> Kind {
        match &self.expect {
            Some(Expect::ReferenceDiscovery(_)) => Kind::Discovery,
            Some(Expect::Negotiation(_)) => Kind::Negotiation,
            Some(Expect::NegotiationResult) => Kind::NegotiationResult,
            Some(Expect::Pack(_)) => Kind::Pack,
            Some(Expect::ReportStatus { .. }) => Kind::Report,
            None => Kind::Unprimed,
        }
    }

    /// Handle one data line (or side-band frame payload).
    fn on_line(&mut self, payload: &[u8]) -> Result<Option<Message>> {
        match self.kind() {
            Kind::Discovery => self.on_discovery_line(payload),
            Kind::Negotiation => self.on_negotiation_line(payload),
            Kind::NegotiationResult => {
                let result = parse_negotiation_result(trim_line(payload))?;
                self.expect = None;
                Ok(Some(Message::NegotiationResult(result)))
            }
            Kind::Pack => self.on_band_frame(payload),
            Kind::Report => self.on_report_frame(payload),
            Kind::Unprimed => Err(Error::Unprimed),
        }
    }

    /// Handle a flush packet.
    fn on_flush(&mut self) -> Result<Option<Message>> {
        match self.kind() {
            Kind::Discovery => {
                let Partial::Discovery(discovery) = &mut self.partial else {
                    return Err(Error::unexpected("flush without discovery state"));
                };
                if !discovery.announced {
                    return Err(Error::unexpected("flush before service announcement"));
                }
                if !discovery.announce_flushed {
                    discovery.announce_flushed = true;
                    return Ok(None);
                }
                let Partial::Discovery(discovery) = std::mem::replace(&mut self.partial, Partial::None) else {
                    unreachable!("just matched")
                };
                self.expect = None;
                Ok(Some(Message::Advertisement(discovery.advertisement)))
            }
            Kind::Negotiation => {
                let Partial::Acks(acks) = std::mem::replace(&mut self.partial, Partial::None) else {
                    return Err(Error::unexpected("flush without negotiation state"));
                };
                self.expect = None;
                Ok(Some(Message::Acks(acks)))
            }
            Kind::NegotiationResult => Err(Error::unexpected("flush in place of ACK/NAK")),
            Kind::Pack => {
                self.expect = None;
                Ok(Some(Message::Band(BandFrame::End)))
            }
            Kind::Report => {
                let Partial::Report(report) = std::mem::replace(&mut self.partial, Partial::None) else {
                    return Err(Error::unexpected("flush without report state"));
                };
                self.expect = None;
                Ok(Some(finish_report(report)?))
            }
            Kind::Unprimed => Err(Error::Unprimed),
        }
    }

    fn on_discovery_line(&mut self, payload: &[u8]) -> Result<Option<Message>> {
        let Partial::Discovery(discovery) = &mut self.partial else {
            return Err(Error::unexpected("discovery line without discovery state"));
        };
        let line = trim_line(payload);

        if !discovery.announced {
            let service = discovery.service.expect("set at priming");
            let expected = format!("# service={service}");
            if line != expected.as_bytes() {
                return Err(Error::unexpected(format!(
                    "expected service announcement {expected:?}, got {:?}",
                    line.as_bstr()
                )));
            }
            discovery.announced = true;
            return Ok(None);
        }

        if let Some(message) = line.strip_prefix(b"ERR ") {
            return Err(Error::Server(message.as_bstr().to_string()));
        }
        if let Some(rest) = line.strip_prefix(b"shallow ") {
            discovery.advertisement.shallow.push(parse_oid(rest, line)?);
            return Ok(None);
        }

        let (oid_hex, rest) = split_token(line)
            .ok_or_else(|| Error::unexpected(format!("malformed advertisement line {:?}", line.as_bstr())))?;
        let target = parse_oid(oid_hex, line)?;
        let (name, caps) = match rest.find_byte(b'\0') {
            Some(nul) => (&rest[..nul], Some(rest[nul + 1..].as_bstr())),
            None => (rest, None),
        };

        if let Some(caps) = caps {
            if !discovery.caps_taken {
                discovery.advertisement.capabilities = CapabilitySet::parse(caps);
                discovery.caps_taken = true;
            }
        }

        if name == b"capabilities^{}" {
            // Placeholder line of an empty repository; carries capabilities
            // only.
            return Ok(None);
        }
        if let Some(base) = name.strip_suffix(b"^{}") {
            let attached = discovery
                .advertisement
                .refs
                .last_mut()
                .filter(|previous| previous.name == base)
                .map(|previous| previous.peeled = Some(target));
            return match attached {
                Some(()) => Ok(None),
                None => Err(Error::unexpected(format!(
                    "peeled line {:?} does not follow its reference",
                    line.as_bstr()
                ))),
            };
        }

        discovery.advertisement.refs.push(Ref {
            name: name.as_bstr().to_owned(),
            target,
            peeled: None,
        });
        Ok(None)
    }

    fn on_negotiation_line(&mut self, payload: &[u8]) -> Result<Option<Message>> {
        let Partial::Acks(acks) = &mut self.partial else {
            return Err(Error::unexpected("negotiation line without negotiation state"));
        };
        let line = trim_line(payload);

        if let Some(message) = line.strip_prefix(b"ERR ") {
            return Err(Error::Server(message.as_bstr().to_string()));
        }
        if let Some(rest) = line.strip_prefix(b"shallow ") {
            acks.shallow.push(parse_oid(rest, line)?);
            return Ok(None);
        }
        if let Some(rest) = line.strip_prefix(b"unshallow ") {
            acks.unshallow.push(parse_oid(rest, line)?);
            return Ok(None);
        }

        let terminal = line == b"NAK" || matches!(parse_ack(line)?, Some((_, AckStatus::Plain)));
        if terminal {
            // The round is over; hand the ACK/NAK back so the follow-up
            // `NegotiationResult` read consumes it.
            self.pushback = Some(line.to_vec());
            let Partial::Acks(acks) = std::mem::replace(&mut self.partial, Partial::None) else {
                unreachable!("just matched")
            };
            self.expect = None;
            return Ok(Some(Message::Acks(acks)));
        }

        match parse_ack(line)? {
            Some((id, status)) => {
                acks.acks.push((id, status));
                if status == AckStatus::Ready {
                    let Partial::Acks(acks) = std::mem::replace(&mut self.partial, Partial::None) else {
                        unreachable!("just matched")
                    };
                    self.expect = None;
                    return Ok(Some(Message::Acks(acks)));
                }
                Ok(None)
            }
            None => Err(Error::unexpected(format!(
                "expected ACK, NAK or shallow line, got {:?}",
                line.as_bstr()
            ))),
        }
    }

    fn on_band_frame(&mut self, payload: &[u8]) -> Result<Option<Message>> {
        let (channel, data) = payload
            .split_first()
            .ok_or_else(|| Error::unexpected("empty side-band packet"))?;
        match channel {
            1 => Ok(Some(Message::Band(BandFrame::Data(data.to_vec())))),
            2 => Ok(Some(Message::Band(BandFrame::Progress(data.to_vec())))),
            3 => Ok(Some(Message::Band(BandFrame::Error(data.to_vec())))),
            channel => Err(Error::InvalidChannel { channel: *channel }),
        }
    }

    fn on_report_frame(&mut self, payload: &[u8]) -> Result<Option<Message>> {
        let Partial::Report(report) = &mut self.partial else {
            return Err(Error::unexpected("report line without report state"));
        };
        if report.mode == SideBandMode::None {
            report_line(report, trim_line(payload))?;
            return Ok(None);
        }

        let (channel, data) = payload
            .split_first()
            .ok_or_else(|| Error::unexpected("empty side-band packet"))?;
        match channel {
            1 => {
                report.inner.extend_from_slice(data);
                scan_inner_report(report)?;
                Ok(None)
            }
            // Progress chatter during a push is read and dropped.
            2 => Ok(None),
            3 => Err(Error::Server(trim_line(data).as_bstr().to_string())),
            channel => Err(Error::InvalidChannel { channel: *channel }),
        }
    }
}

/// Parse the inner pkt-lines accumulated from report side-band data frames.
fn scan_inner_report(report: &mut ReportPartial) -> Result<()> {
    loop {
        if report.inner_flushed {
            return Ok(());
        }
        let remaining = &report.inner[report.inner_pos..];
        if remaining.len() < 4 {
            return Ok(());
        }
        let len = frame_len(&remaining[..4]).ok_or_else(|| Error::InvalidLengthHeader {
            header: remaining[..4].as_bstr().to_string(),
        })?;
        if len == 0 {
            report.inner_pos += 4;
            report.inner_flushed = true;
            return Ok(());
        }
        if !(4..=MAX_FRAME_LEN).contains(&len) {
            return Err(Error::InvalidLengthHeader {
                header: remaining[..4].as_bstr().to_string(),
            });
        }
        if remaining.len() < len {
            return Ok(());
        }
        let line = remaining[4..len].to_vec();
        report.inner_pos += len;
        report_line(report, trim_line(&line))?;
    }
}

/// Apply one `unpack`/`ok`/`ng` line to the report being assembled.
fn report_line(report: &mut ReportPartial, line: &[u8]) -> Result<()> {
    if let Some(rest) = line.strip_prefix(b"unpack ") {
        report.unpack = Some(if rest == b"ok" {
            Ok(())
        } else {
            Err(rest.as_bstr().to_string())
        });
        return Ok(());
    }
    if let Some(rest) = line.strip_prefix(b"ok ") {
        let name = rest.as_bstr().to_owned();
        ensure_reported_ref(report, &name, line)?;
        report.commands.push((name, RefStatus::Ok));
        return Ok(());
    }
    if let Some(rest) = line.strip_prefix(b"ng ") {
        let (name, reason) = split_token(rest)
            .ok_or_else(|| Error::unexpected(format!("malformed ng line {:?}", line.as_bstr())))?;
        let name = name.as_bstr().to_owned();
        ensure_reported_ref(report, &name, line)?;
        report
            .commands
            .push((name, RefStatus::Rejected(reason.as_bstr().to_string())));
        return Ok(());
    }
    Err(Error::unexpected(format!(
        "expected unpack/ok/ng line, got {:?}",
        line.as_bstr()
    )))
}

fn ensure_reported_ref(report: &ReportPartial, name: &BString, line: &[u8]) -> Result<()> {
    if report.refs.iter().any(|requested| requested == name) {
        Ok(())
    } else {
        Err(Error::unexpected(format!(
            "status for unrequested ref in {:?}",
            line.as_bstr()
        )))
    }
}

fn finish_report(report: ReportPartial) -> Result<Message> {
    match report.unpack {
        Some(unpack) => Ok(Message::ReportStatus(ReportStatus {
            unpack,
            commands: report.commands,
        })),
        None => Err(Error::UnexpectedEndOfInput),
    }
}

/// Parse a pkt-line length header.
fn frame_len(head: &[u8]) -> Option<usize> {
    let mut len = 0usize;
    for &byte in head {
        let digit = match byte {
            b'0'..=b'9' => byte - b'0',
            b'a'..=b'f' => byte - b'a' + 10,
            b'A'..=b'F' => byte - b'A' + 10,
            _ => return None,
        };
        len = len * 16 + usize::from(digit);
    }
    Some(len)
}

/// Strip the single trailing newline servers append to text lines.
fn trim_line(payload: &[u8]) -> &[u8] {
    payload.strip_suffix(b"\n").unwrap_or(payload)
}

/// Split at the first space into `(token, rest)`.
fn split_token(line: &[u8]) -> Option<(&[u8], &[u8])> {
    line.find_byte(b' ').map(|at| (&line[..at], &line[at + 1..]))
}

fn parse_oid(hex: &[u8], line: &[u8]) -> Result<ObjectId> {
    ObjectId::from_hex(hex).map_err(|_| Error::InvalidObjectId {
        line: line.as_bstr().to_string(),
    })
}

fn parse_negotiation_result(line: &[u8]) -> Result<NegotiationResult> {
    if line == b"NAK" {
        return Ok(NegotiationResult::Nak);
    }
    if let Some(message) = line.strip_prefix(b"ERR ") {
        return Err(Error::Server(message.as_bstr().to_string()));
    }
    match parse_ack(line)? {
        Some((id, AckStatus::Plain)) => Ok(NegotiationResult::Ack(id)),
        _ => Err(Error::unexpected(format!(
            "expected ACK or NAK, got {:?}",
            line.as_bstr()
        ))),
    }
}

/// Parse an `ACK <oid>[ <status>]` line; `Ok(None)` if the line is no ack.
fn parse_ack(line: &[u8]) -> Result<Option<(ObjectId, AckStatus)>> {
    let Some(rest) = line.strip_prefix(b"ACK ") else {
        return Ok(None);
    };
    let (hex, status) = match split_token(rest) {
        Some((hex, status)) => (hex, status),
        None => (rest, b"".as_slice()),
    };
    let id = parse_oid(hex, line)?;
    let status = match status {
        b"" => AckStatus::Plain,
        b"continue" => AckStatus::Continue,
        b"common" => AckStatus::Common,
        b"ready" => AckStatus::Ready,
        other => {
            return Err(Error::unexpected(format!(
                "unknown ack status {:?}",
                other.as_bstr()
            )))
        }
    };
    Ok(Some((id, status)))
}
