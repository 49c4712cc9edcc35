//! Test support for the smart HTTP client crates.
//!
//! Provides a scripted HTTP transport that replays canned responses while
//! recording requests, an in-memory store, pkt-line fixture builders, and
//! server-side request parsers used to assert wire round-trips.

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

use bstr::{BStr, BString, ByteSlice};
use gix_hash::ObjectId;
use gix_smart_core::http::{HttpClient, ResponseBody, TransportError};
use gix_smart_core::store::{RefTarget, Store};
use std::collections::VecDeque;
use std::io::Read;

/// Build one data pkt-line around `payload`.
pub fn pkt(payload: &[u8]) -> Vec<u8> {
    let mut out = format!("{:04x}", payload.len() + 4).into_bytes();
    out.extend_from_slice(payload);
    out
}

/// Build one data pkt-line around a text payload.
pub fn pkt_str(payload: &str) -> Vec<u8> {
    pkt(payload.as_bytes())
}

/// The flush packet.
pub const FLUSH: &[u8] = b"0000";

/// Build one side-band packet for `channel` carrying `data`.
pub fn band(channel: u8, data: &[u8]) -> Vec<u8> {
    let mut payload = vec![channel];
    payload.extend_from_slice(data);
    pkt(&payload)
}

/// Build a smart HTTP discovery response body.
///
/// `lines` are the advertisement lines (the first usually carrying the NUL
/// separated capability list), already without pkt framing.
pub fn advertisement(service: &str, lines: &[&str]) -> Vec<u8> {
    let mut out = pkt_str(&format!("# service={service}\n"));
    out.extend_from_slice(FLUSH);
    for line in lines {
        out.extend(pkt_str(&format!("{line}\n")));
    }
    out.extend_from_slice(FLUSH);
    out
}

/// One scripted request/response pair.
struct Exchange {
    method: &'static str,
    url_fragment: String,
    response: Vec<u8>,
}

/// A request as seen by the scripted transport.
pub struct RecordedRequest {
    /// `GET` or `POST`.
    pub method: String,
    /// The full request URL.
    pub url: String,
    /// The headers sent with the request.
    pub headers: Vec<(String, String)>,
    /// The request body; empty for GETs.
    pub body: Vec<u8>,
}

impl RecordedRequest {
    /// Look up a header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// An HTTP client replaying scripted responses in order.
///
/// Requests must arrive in script order with matching method and URL
/// fragment; anything else panics, which is the desired behavior inside a
/// test. All requests are recorded for later assertions.
pub struct ScriptedTransport {
    exchanges: VecDeque<Exchange>,
    /// Every request the drivers issued, in order.
    pub requests: Vec<RecordedRequest>,
    chunk_size: usize,
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedTransport {
    /// An empty script with a default response chunk size.
    pub fn new() -> Self {
        Self {
            exchanges: VecDeque::new(),
            requests: Vec::new(),
            chunk_size: 4096,
        }
    }

    /// Deliver response bodies in chunks of `size` bytes to exercise
    /// chunk-boundary handling.
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        assert!(size > 0, "chunk size must be positive");
        self.chunk_size = size;
        self
    }

    /// Script a GET whose URL contains `url_fragment`.
    pub fn on_get(mut self, url_fragment: impl Into<String>, response: Vec<u8>) -> Self {
        self.exchanges.push_back(Exchange {
            method: "GET",
            url_fragment: url_fragment.into(),
            response,
        });
        self
    }

    /// Script a POST whose URL contains `url_fragment`.
    pub fn on_post(mut self, url_fragment: impl Into<String>, response: Vec<u8>) -> Self {
        self.exchanges.push_back(Exchange {
            method: "POST",
            url_fragment: url_fragment.into(),
            response,
        });
        self
    }

    /// Panic unless every scripted exchange was used.
    pub fn assert_done(&self) {
        assert!(
            self.exchanges.is_empty(),
            "{} scripted exchanges were never requested",
            self.exchanges.len()
        );
    }

    fn respond(
        &mut self,
        method: &str,
        url: &url::Url,
        headers: &[(String, String)],
        body: Vec<u8>,
    ) -> Result<ScriptedBody, TransportError> {
        let exchange = self
            .exchanges
            .pop_front()
            .unwrap_or_else(|| panic!("unscripted {method} {url}"));
        assert_eq!(exchange.method, method, "unexpected method for {url}");
        assert!(
            url.as_str().contains(&exchange.url_fragment),
            "{url} does not contain {:?}",
            exchange.url_fragment
        );
        self.requests.push(RecordedRequest {
            method: method.to_string(),
            url: url.to_string(),
            headers: headers.to_vec(),
            body,
        });
        Ok(ScriptedBody {
            chunks: exchange
                .response
                .chunks(self.chunk_size)
                .map(<[u8]>::to_vec)
                .collect(),
            current: Vec::new(),
        })
    }
}

impl HttpClient for ScriptedTransport {
    type Body = ScriptedBody;

    fn get(&mut self, url: &url::Url, headers: &[(String, String)]) -> Result<Self::Body, TransportError> {
        self.respond("GET", url, headers, Vec::new())
    }

    fn post(
        &mut self,
        url: &url::Url,
        headers: &[(String, String)],
        body: &mut dyn Read,
    ) -> Result<Self::Body, TransportError> {
        let mut bytes = Vec::new();
        body.read_to_end(&mut bytes)
            .map_err(|err| TransportError::with_source("failed to read request body", err))?;
        self.respond("POST", url, headers, bytes)
    }
}

/// The body type produced by [`ScriptedTransport`].
pub struct ScriptedBody {
    chunks: VecDeque<Vec<u8>>,
    current: Vec<u8>,
}

impl ResponseBody for ScriptedBody {
    fn next_chunk(&mut self) -> Result<Option<&[u8]>, TransportError> {
        match self.chunks.pop_front() {
            Some(chunk) => {
                self.current = chunk;
                Ok(Some(&self.current))
            }
            None => Ok(None),
        }
    }
}

/// The error type of [`MemoryStore`].
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct StoreFailure(pub String);

/// An in-memory store recording packs and ref writes.
pub struct MemoryStore {
    /// Every ingested pack, verbatim.
    pub packs: Vec<Vec<u8>>,
    /// Every ref write in order.
    pub refs: Vec<(BString, RefTarget)>,
    /// The object count reported for each ingested pack.
    pub objects_per_pack: u64,
    /// When set, the next pack ingestion fails with this message.
    pub fail_next_pack: Option<String>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// An empty store reporting 1 object per pack.
    pub fn new() -> Self {
        Self {
            packs: Vec::new(),
            refs: Vec::new(),
            objects_per_pack: 1,
            fail_next_pack: None,
        }
    }

    /// The most recent target written for `name`, if any.
    pub fn ref_target(&self, name: &str) -> Option<&RefTarget> {
        self.refs
            .iter()
            .rev()
            .find(|(written, _)| written == name)
            .map(|(_, target)| target)
    }
}

impl Store for MemoryStore {
    type Error = StoreFailure;

    fn ingest_pack(&mut self, pack: &mut dyn Read) -> Result<(ObjectId, u64), Self::Error> {
        let mut bytes = Vec::new();
        pack.read_to_end(&mut bytes)
            .map_err(|err| StoreFailure(err.to_string()))?;
        if let Some(message) = self.fail_next_pack.take() {
            return Err(StoreFailure(message));
        }
        self.packs.push(bytes);
        Ok((ObjectId::null(gix_hash::Kind::Sha1), self.objects_per_pack))
    }

    fn write_ref(&mut self, name: &BStr, target: RefTarget) -> Result<(), Self::Error> {
        self.refs.push((name.to_owned(), target));
        Ok(())
    }
}

/// One pkt-line of a client request, as seen by a server.
#[derive(Debug, PartialEq, Eq)]
pub enum Pkt {
    /// A data line, newline still attached if the client sent one.
    Data(Vec<u8>),
    /// A flush packet.
    Flush,
}

/// Split a byte stream into pkt-lines, returning the parsed prefix and any
/// non-pkt suffix (a trailing pack stream, for update requests).
pub fn split_pkts(mut bytes: &[u8]) -> (Vec<Pkt>, Vec<u8>) {
    let mut pkts = Vec::new();
    loop {
        if bytes.len() < 4 {
            return (pkts, bytes.to_vec());
        }
        let Some(len) = hex4(&bytes[..4]) else {
            return (pkts, bytes.to_vec());
        };
        if len == 0 {
            pkts.push(Pkt::Flush);
            bytes = &bytes[4..];
            continue;
        }
        if len < 4 || bytes.len() < len {
            return (pkts, bytes.to_vec());
        }
        pkts.push(Pkt::Data(bytes[4..len].to_vec()));
        bytes = &bytes[len..];
    }
}

fn hex4(head: &[u8]) -> Option<usize> {
    let mut len = 0usize;
    for &byte in head {
        let digit = match byte {
            b'0'..=b'9' => byte - b'0',
            b'a'..=b'f' => byte - b'a' + 10,
            _ => return None,
        };
        len = len * 16 + usize::from(digit);
    }
    Some(len)
}

/// An upload-pack request as a server would parse it.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ParsedUploadRequest {
    /// Wanted object ids in order.
    pub wants: Vec<ObjectId>,
    /// Capability tokens from the first want line.
    pub capabilities: Vec<BString>,
    /// Shallow lines.
    pub shallow: Vec<ObjectId>,
    /// The deepen depth, if requested.
    pub deepen: Option<u32>,
    /// Have lines.
    pub haves: Vec<ObjectId>,
    /// Whether the request ended with `done`.
    pub done: bool,
}

/// Parse an upload-pack request body the way the server side does.
pub fn parse_upload_request(body: &[u8]) -> ParsedUploadRequest {
    let (pkts, rest) = split_pkts(body);
    assert!(rest.is_empty(), "trailing garbage after upload request");
    let mut parsed = ParsedUploadRequest::default();
    for item in pkts {
        let Pkt::Data(line) = item else { continue };
        let line = line.strip_suffix(b"\n").unwrap_or(&line);
        if let Some(rest) = line.strip_prefix(b"want ") {
            let (hex, caps) = match rest.find_byte(b' ') {
                Some(at) => (&rest[..at], Some(&rest[at + 1..])),
                None => (rest, None),
            };
            parsed.wants.push(oid(hex));
            if let Some(caps) = caps {
                parsed.capabilities = caps.fields().map(|f| f.as_bstr().to_owned()).collect();
            }
        } else if let Some(rest) = line.strip_prefix(b"shallow ") {
            parsed.shallow.push(oid(rest));
        } else if let Some(rest) = line.strip_prefix(b"deepen ") {
            parsed.deepen = Some(rest.to_str().unwrap().parse().unwrap());
        } else if let Some(rest) = line.strip_prefix(b"have ") {
            parsed.haves.push(oid(rest));
        } else if line == b"done" {
            parsed.done = true;
        } else {
            panic!("unexpected upload request line {:?}", line.as_bstr());
        }
    }
    parsed
}

/// A receive-pack request as a server would parse it.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ParsedUpdateRequest {
    /// Shallow lines.
    pub shallow: Vec<ObjectId>,
    /// `(old, new, refname)` triples in order.
    pub commands: Vec<(ObjectId, ObjectId, BString)>,
    /// Capability tokens from the first command line.
    pub capabilities: Vec<BString>,
    /// The pack stream following the flush.
    pub pack: Vec<u8>,
}

/// Parse a receive-pack request body the way the server side does.
///
/// Header pkt-lines are consumed one at a time so the raw pack stream after
/// the flush stays untouched.
pub fn parse_update_request(body: &[u8]) -> ParsedUpdateRequest {
    let mut parsed = ParsedUpdateRequest::default();
    let mut bytes = body;
    loop {
        assert!(bytes.len() >= 4, "update request ended before flush");
        let len = hex4(&bytes[..4]).expect("malformed update request header");
        if len == 0 {
            parsed.pack = bytes[4..].to_vec();
            return parsed;
        }
        assert!(len >= 4 && bytes.len() >= len, "truncated update request line");
        let line_owned = bytes[4..len].to_vec();
        bytes = &bytes[len..];

        let line = line_owned.strip_suffix(b"\n").unwrap_or(&line_owned);
        if let Some(rest) = line.strip_prefix(b"shallow ") {
            parsed.shallow.push(oid(rest));
            continue;
        }
        let (command, caps) = match line.find_byte(b'\0') {
            Some(at) => (&line[..at], Some(&line[at + 1..])),
            None => (line, None),
        };
        if let Some(caps) = caps {
            parsed.capabilities = caps.fields().map(|f| f.as_bstr().to_owned()).collect();
        }
        let mut fields = command.splitn_str(3, " ");
        let old = oid(fields.next().expect("old id"));
        let new = oid(fields.next().expect("new id"));
        let name = fields.next().expect("refname").as_bstr().to_owned();
        parsed.commands.push((old, new, name));
    }
}

fn oid(hex: &[u8]) -> ObjectId {
    ObjectId::from_hex(hex).unwrap_or_else(|err| panic!("bad oid {:?}: {err}", hex.as_bstr()))
}

/// A 40-hex object id built by repeating `digit`.
pub fn oid_of(digit: char) -> ObjectId {
    let hex: String = std::iter::repeat(digit).take(40).collect();
    ObjectId::from_hex(hex.as_bytes()).expect("valid hex digit")
}
