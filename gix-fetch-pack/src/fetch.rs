//! The fetch driver: discovery, negotiation rounds, pack retrieval.

use crate::demux::{PackStream, Sinks};
use crate::negotiate::{Negotiation, Negotiator};
use gix_hash::ObjectId;
use gix_smart_core::bridge::{MessageReader, RequestBody};
use gix_smart_core::capabilities::{CapabilitySet, SideBandMode};
use gix_smart_core::decode::{Decoder, Expect};
use gix_smart_core::discovery::read_advertisement;
use gix_smart_core::encode::Encoder;
use gix_smart_core::endpoint::{request_headers, Endpoint, Purpose};
use gix_smart_core::error::{Error, Result};
use gix_smart_core::http::{HttpClient, ResponseBody};
use gix_smart_core::message::{Acks, Message, Ref, Terminator, UploadRequest};
use gix_smart_core::store::Store;
use gix_smart_core::Service;
use std::collections::HashSet;
use std::sync::Mutex;

/// Configuration of a fetch.
#[derive(Debug, Clone)]
pub struct Options {
    /// The capabilities the client offers; must carry an `agent` entry.
    pub capabilities: CapabilitySet,
    /// Shallow boundaries known to the client.
    pub shallow: Vec<ObjectId>,
    /// Optional history truncation depth.
    pub deepen: Option<u32>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            capabilities: CapabilitySet::client_defaults(concat!(
                "git/gix-fetch-pack-",
                env!("CARGO_PKG_VERSION")
            )),
            shallow: Vec::new(),
            deepen: None,
        }
    }
}

/// A single-slot mailbox holding the shared have set for one fetch.
///
/// Take-modify-put is the only permitted access pattern. The driver is
/// currently single-threaded, but the slot states the sharing contract of
/// the set and keeps it valid if negotiation callbacks ever run
/// concurrently with the loop.
struct HaveSlot {
    slot: Mutex<Option<HashSet<ObjectId>>>,
}

impl HaveSlot {
    fn new(initial: HashSet<ObjectId>) -> Self {
        Self {
            slot: Mutex::new(Some(initial)),
        }
    }

    fn take(&self) -> HashSet<ObjectId> {
        self.slot
            .lock()
            .expect("have mailbox poisoned")
            .take()
            .expect("take and put are strictly paired")
    }

    fn put(&self, set: HashSet<ObjectId>) {
        let previous = self.slot.lock().expect("have mailbox poisoned").replace(set);
        debug_assert!(previous.is_none(), "take and put are strictly paired");
    }
}

/// Fetch wanted refs from `endpoint` into `store`.
///
/// `want` selects among the advertised refs; selecting nothing succeeds
/// immediately with zero objects and no negotiation POST. Otherwise the
/// driver negotiates with the server (consulting `negotiator` after each
/// round of acks when `have` is non-empty) and streams the resulting pack
/// into the store.
///
/// Returns the selection together with the object count reported by the
/// store.
pub fn fetch<H, S, N, F>(
    http: &mut H,
    store: &mut S,
    endpoint: &Endpoint,
    options: &Options,
    have: HashSet<ObjectId>,
    want: F,
    negotiator: &mut N,
    mut sinks: Sinks<'_>,
) -> Result<(Vec<Ref>, u64)>
where
    H: HttpClient,
    S: Store,
    N: Negotiator + ?Sized,
    F: FnOnce(&[Ref]) -> Vec<Ref>,
{
    let mut decoder = Decoder::new();
    let advertisement = read_advertisement(
        http,
        endpoint,
        &options.capabilities,
        Service::UploadPack,
        &mut decoder,
    )?;
    let common = options.capabilities.intersect(&advertisement.capabilities);
    let side_band = common.side_band_mode();
    let ack_mode = common.ack_mode();

    let wanted = want(&advertisement.refs);
    if wanted.is_empty() {
        tracing::debug!("nothing selected, fetch complete without negotiation");
        return Ok((wanted, 0));
    }
    let wants: Vec<ObjectId> = wanted.iter().map(|reference| reference.target).collect();
    tracing::debug!(
        wants = wants.len(),
        haves = have.len(),
        ?side_band,
        ?ack_mode,
        "starting negotiation"
    );

    let request_capabilities = common.negotiated();
    let round = |haves: &HashSet<ObjectId>| UploadRequest {
        wants: wants.clone(),
        haves: sorted(haves),
        shallow: options.shallow.clone(),
        deepen: options.deepen,
        capabilities: request_capabilities.clone(),
    };

    if have.is_empty() {
        // Nothing to negotiate over: a single done round, then the pack.
        let mut body = negotiation_post(http, endpoint, &options.capabilities, &round(&have), Terminator::Done)?;
        let mut reader = MessageReader::new(&mut decoder, &mut body);
        expect_result(&mut reader)?;
        let count = ingest(store, reader, side_band, &mut sinks)?;
        return Ok((wanted, count));
    }

    let slot = HaveSlot::new(have);
    let mut body = negotiation_post(
        http,
        endpoint,
        &options.capabilities,
        &round(&slot_snapshot(&slot)),
        Terminator::Flush,
    )?;
    loop {
        decoder.expect(Expect::Negotiation(ack_mode));
        let mut reader = MessageReader::new(&mut decoder, &mut body);
        let acks = expect_acks(&mut reader)?;

        match negotiator.negotiate(&acks) {
            Negotiation::Ready => {
                expect_result(&mut reader)?;
                let count = ingest(store, reader, side_band, &mut sinks)?;
                return Ok((wanted, count));
            }
            Negotiation::Again(added) => {
                drain_round_terminator(&mut reader)?;
                drop(reader);
                let mut haves = slot.take();
                haves.extend(added);
                slot.put(haves);
                body = negotiation_post(
                    http,
                    endpoint,
                    &options.capabilities,
                    &round(&slot_snapshot(&slot)),
                    Terminator::Flush,
                )?;
            }
            Negotiation::Done => {
                drain_round_terminator(&mut reader)?;
                drop(reader);
                // Narrow the set to what the server actually acknowledged.
                slot.take();
                slot.put(acks.ids().collect());
                body = negotiation_post(
                    http,
                    endpoint,
                    &options.capabilities,
                    &round(&slot_snapshot(&slot)),
                    Terminator::Done,
                )?;
                decoder.expect(Expect::Negotiation(ack_mode));
                let mut reader = MessageReader::new(&mut decoder, &mut body);
                expect_acks(&mut reader)?;
                expect_result(&mut reader)?;
                let count = ingest(store, reader, side_band, &mut sinks)?;
                return Ok((wanted, count));
            }
        }
    }
}

/// Read the have set without violating the take/put pairing.
fn slot_snapshot(slot: &HaveSlot) -> HashSet<ObjectId> {
    let set = slot.take();
    let snapshot = set.clone();
    slot.put(set);
    snapshot
}

/// Order the haves for a deterministic request body.
fn sorted(haves: &HashSet<ObjectId>) -> Vec<ObjectId> {
    let mut ordered: Vec<ObjectId> = haves.iter().copied().collect();
    ordered.sort();
    ordered
}

fn negotiation_post<H: HttpClient>(
    http: &mut H,
    endpoint: &Endpoint,
    client_capabilities: &CapabilitySet,
    request: &UploadRequest,
    terminator: Terminator,
) -> Result<H::Body> {
    let headers = request_headers(endpoint, client_capabilities, Purpose::Request(Service::UploadPack))?;
    let url = endpoint.service_url(Service::UploadPack);
    let encoder = Encoder::upload_request(request, terminator);
    let mut body = RequestBody::new(encoder);
    Ok(http.post(&url, &headers, &mut body)?)
}

fn expect_acks<B: ResponseBody>(reader: &mut MessageReader<'_, B>) -> Result<Acks> {
    reader.expect_message("acks", |message| match message {
        Message::Acks(acks) => Some(acks),
        _ => None,
    })
}

fn expect_result<B: ResponseBody>(reader: &mut MessageReader<'_, B>) -> Result<()> {
    reader.prime(Expect::NegotiationResult);
    reader.expect_message("a negotiation result", |message| match message {
        Message::NegotiationResult(result) => Some(result),
        _ => None,
    })?;
    Ok(())
}

/// Consume the plain ACK/NAK that terminated the round, so the decoder is
/// clean before the response is dropped and the next POST begins.
fn drain_round_terminator<B: ResponseBody>(reader: &mut MessageReader<'_, B>) -> Result<()> {
    if reader.has_pending_line() {
        expect_result(reader)?;
    }
    Ok(())
}

/// Stream the pack phase into the store and map failures to the taxonomy.
fn ingest<S: Store, B: ResponseBody>(
    store: &mut S,
    reader: MessageReader<'_, B>,
    side_band: SideBandMode,
    sinks: &mut Sinks<'_>,
) -> Result<u64> {
    let mut stream = PackStream::new(
        reader,
        side_band,
        Sinks {
            progress: &mut *sinks.progress,
            errors: &mut *sinks.errors,
        },
    );
    let outcome = store.ingest_pack(&mut stream);
    if let Some(failure) = stream.take_failure() {
        return Err(failure);
    }
    match outcome {
        Ok((id, count)) => {
            tracing::debug!(pack = %id.to_hex(), objects = count, "pack ingested");
            Ok(count)
        }
        Err(err) => match stream.server_error() {
            Some(message) => Err(Error::Sync(message)),
            None => Err(Error::store(err)),
        },
    }
}
