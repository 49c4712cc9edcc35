//! gix-smart-http: high-level policies over the smart HTTP client drivers.
//!
//! Thin orchestration of `gix-fetch-pack` and `gix-send-pack`: cloning a
//! single ref, fetching one/some/all refs into local names, and pushing
//! updates computed by a caller-supplied handler. Local ref and HEAD
//! bookkeeping happens here; the wire work stays in the driver crates.

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

use bstr::{BStr, BString, ByteSlice};
use gix_fetch_pack::negotiate::Negotiator;
use gix_fetch_pack::{fetch, BatchNegotiator, Sinks};
use gix_hash::ObjectId;
use gix_send_pack::pack::PackGenerator;
use gix_send_pack::{push, CommandOutcome};
use gix_smart_core::error::{Error, Result};
use gix_smart_core::http::HttpClient;
use gix_smart_core::message::{Command, Ref};
use gix_smart_core::store::{RefTarget, Store, HEAD};
use gix_smart_core::Endpoint;
use std::collections::{BTreeMap, HashSet};

pub use gix_fetch_pack::Options as FetchOptions;
pub use gix_send_pack::Options as PushOptions;

/// A mapping from remote refnames to the local refnames tracking them.
#[derive(Debug, Clone, Default)]
pub struct RefMap {
    inner: BTreeMap<BString, Vec<BString>>,
}

impl RefMap {
    /// An empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `remote` under the additional local name `local`.
    pub fn insert(&mut self, remote: impl Into<BString>, local: impl Into<BString>) {
        self.inner.entry(remote.into()).or_default().push(local.into());
    }

    /// The local names tracking `remote`, if any.
    pub fn locals(&self, remote: &BStr) -> Option<&[BString]> {
        self.inner.get(remote).map(Vec::as_slice)
    }

    /// Whether `remote` is tracked at all.
    pub fn contains(&self, remote: &BStr) -> bool {
        self.inner.contains_key(remote)
    }

    /// The number of tracked remote refs.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// The outcome of a fetch policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Nothing needed updating (or the requested ref was not advertised).
    UpToDate,
    /// These local refs were written, in `(local, target)` pairs.
    Updated(Vec<(BString, ObjectId)>),
}

/// Clone a single remote ref: fetch it with an empty have set, then write
/// the local ref and point HEAD at it symbolically.
///
/// Both writes happen only after the pack fully landed in the store, local
/// ref first, HEAD second.
pub fn clone<H, S>(
    http: &mut H,
    store: &mut S,
    endpoint: &Endpoint,
    options: &FetchOptions,
    remote_ref: &BStr,
    local_ref: &BStr,
    sinks: Sinks<'_>,
) -> Result<ObjectId>
where
    H: HttpClient,
    S: Store,
{
    // With nothing to claim as common, the negotiator is never consulted.
    let mut negotiator = BatchNegotiator::new(Vec::new(), 1);
    let (refs, _count) = fetch(
        http,
        store,
        endpoint,
        options,
        HashSet::new(),
        |advertised| gix_fetch_pack::select_by_name(advertised, &[remote_ref]),
        &mut negotiator,
        sinks,
    )?;

    let target = match refs.as_slice() {
        [reference] => reference.target,
        other => {
            return Err(Error::sync(format!(
                "Unexpected result: {} refs matched {:?} instead of exactly one",
                other.len(),
                remote_ref
            )))
        }
    };
    store
        .write_ref(local_ref, RefTarget::Id(target))
        .map_err(Error::store)?;
    store
        .write_ref(HEAD.into(), RefTarget::Symbolic(local_ref.to_owned()))
        .map_err(Error::store)?;
    tracing::debug!(local = %local_ref, target = %target.to_hex(), "clone complete");
    Ok(target)
}

/// Fetch one remote ref into the given local names.
pub fn fetch_one<H, S, N>(
    http: &mut H,
    store: &mut S,
    endpoint: &Endpoint,
    options: &FetchOptions,
    remote_ref: &BStr,
    local_refs: &[BString],
    have: HashSet<ObjectId>,
    negotiator: &mut N,
    sinks: Sinks<'_>,
) -> Result<FetchOutcome>
where
    H: HttpClient,
    S: Store,
    N: Negotiator + ?Sized,
{
    let mut map = RefMap::new();
    for local in local_refs {
        map.insert(remote_ref.to_owned(), local.clone());
    }
    fetch_some(http, store, endpoint, options, &map, have, negotiator, sinks)
}

/// Fetch the remote refs named in `map`, writing their local names.
///
/// Refs the server delivered that were never requested are logged and
/// skipped, never an error.
pub fn fetch_some<H, S, N>(
    http: &mut H,
    store: &mut S,
    endpoint: &Endpoint,
    options: &FetchOptions,
    map: &RefMap,
    have: HashSet<ObjectId>,
    negotiator: &mut N,
    sinks: Sinks<'_>,
) -> Result<FetchOutcome>
where
    H: HttpClient,
    S: Store,
    N: Negotiator + ?Sized,
{
    fetch_and_set_references(
        http,
        store,
        endpoint,
        options,
        |reference| map.contains(reference.name.as_bstr()),
        map,
        have,
        negotiator,
        sinks,
    )
}

/// Fetch every advertised ref, writing local names for those in `map`.
pub fn fetch_all<H, S, N>(
    http: &mut H,
    store: &mut S,
    endpoint: &Endpoint,
    options: &FetchOptions,
    map: &RefMap,
    have: HashSet<ObjectId>,
    negotiator: &mut N,
    sinks: Sinks<'_>,
) -> Result<FetchOutcome>
where
    H: HttpClient,
    S: Store,
    N: Negotiator + ?Sized,
{
    fetch_and_set_references(http, store, endpoint, options, |_| true, map, have, negotiator, sinks)
}

/// The shared fetch policy: select, download, then write local refs.
#[allow(clippy::too_many_arguments)]
fn fetch_and_set_references<H, S, N, C>(
    http: &mut H,
    store: &mut S,
    endpoint: &Endpoint,
    options: &FetchOptions,
    choose: C,
    map: &RefMap,
    have: HashSet<ObjectId>,
    negotiator: &mut N,
    sinks: Sinks<'_>,
) -> Result<FetchOutcome>
where
    H: HttpClient,
    S: Store,
    N: Negotiator + ?Sized,
    C: Fn(&Ref) -> bool,
{
    let (refs, count) = fetch(
        http,
        store,
        endpoint,
        options,
        have,
        |advertised| advertised.iter().filter(|r| choose(r)).cloned().collect(),
        negotiator,
        sinks,
    )?;
    tracing::debug!(refs = refs.len(), objects = count, "fetch complete, updating local refs");

    let mut updated = Vec::new();
    for reference in &refs {
        match map.locals(reference.name.as_bstr()) {
            Some(locals) => {
                for local in locals {
                    store
                        .write_ref(local.as_bstr(), RefTarget::Id(reference.target))
                        .map_err(Error::store)?;
                    updated.push((local.clone(), reference.target));
                }
            }
            None => {
                // Servers may deliver refs nobody asked for; record and move
                // on rather than failing the whole fetch.
                tracing::warn!(
                    reference = %reference.name,
                    "downloaded a reference that was not requested, ignoring"
                );
            }
        }
    }

    if updated.is_empty() {
        Ok(FetchOutcome::UpToDate)
    } else {
        Ok(FetchOutcome::Updated(updated))
    }
}

/// Push updates computed by `handler` from the store, the requested
/// references, and whatever the server advertised.
pub fn update_and_create<H, S, P, F>(
    http: &mut H,
    store: &mut S,
    endpoint: &Endpoint,
    options: &PushOptions,
    references: &RefMap,
    handler: F,
    packer: &mut P,
) -> Result<Vec<CommandOutcome>>
where
    H: HttpClient,
    S: Store,
    P: PackGenerator<S> + ?Sized,
    F: FnOnce(&S, &RefMap, &[Ref]) -> Vec<Command>,
{
    push(http, store, endpoint, options, |store, advertised| {
        handler(store, references, advertised)
    }, packer)
}
