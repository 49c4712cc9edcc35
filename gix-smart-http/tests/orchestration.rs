//! Clone/fetch/push policies against a scripted transport.

use bstr::BString;
use gix_fetch_pack::negotiate::{Negotiation, Negotiator};
use gix_fetch_pack::Sinks;
use gix_hash::ObjectId;
use gix_send_pack::pack::PackConfig;
use gix_smart_core::error::Error;
use gix_smart_core::message::{Acks, Command, Ref, RefStatus};
use gix_smart_core::store::{RefTarget, HEAD};
use gix_smart_core::Endpoint;
use gix_smart_http::{
    clone, fetch_all, fetch_one, fetch_some, update_and_create, FetchOptions, FetchOutcome, PushOptions, RefMap,
};
use gix_smart_testtools::{advertisement, band, oid_of, pkt_str, MemoryStore, ScriptedTransport, FLUSH};
use std::collections::HashSet;
use std::io::Read;

fn endpoint() -> Endpoint {
    Endpoint::parse("https://example.com/repo.git").unwrap()
}

fn pack_response(pack: &[u8]) -> Vec<u8> {
    let mut response = pkt_str("NAK\n");
    response.extend(band(1, pack));
    response.extend_from_slice(FLUSH);
    response
}

fn sinks<'a>(progress: &'a mut Vec<u8>, errors: &'a mut Vec<u8>) -> Sinks<'a> {
    Sinks { progress, errors }
}

struct AlwaysDone;

impl Negotiator for AlwaysDone {
    fn negotiate(&mut self, _acks: &Acks) -> Negotiation {
        Negotiation::Done
    }
}

#[test]
fn clone_writes_local_ref_then_head_after_ingestion() {
    let h1 = oid_of('1');
    let adv = advertisement(
        "git-upload-pack",
        &[&format!(
            "{} refs/heads/master\0multi_ack_detailed side-band-64k agent=git/2.46.0",
            h1.to_hex()
        )],
    );
    let mut http = ScriptedTransport::new()
        .on_get("info/refs", adv)
        .on_post("/git-upload-pack", pack_response(b"PACK-CLONE"));
    let mut store = MemoryStore::new();
    let (mut progress, mut errors) = (Vec::new(), Vec::new());

    let target = clone(
        &mut http,
        &mut store,
        &endpoint(),
        &FetchOptions::default(),
        "refs/heads/master".into(),
        "refs/heads/master".into(),
        sinks(&mut progress, &mut errors),
    )
    .unwrap();

    assert_eq!(target, h1);
    assert_eq!(store.packs, vec![b"PACK-CLONE".to_vec()]);
    // Local ref before HEAD, both after the pack landed.
    assert_eq!(store.refs.len(), 2);
    assert_eq!(store.refs[0].0, "refs/heads/master");
    assert_eq!(store.refs[0].1, RefTarget::Id(h1));
    assert_eq!(store.refs[1].0, HEAD);
    assert_eq!(
        store.refs[1].1,
        RefTarget::Symbolic(BString::from("refs/heads/master"))
    );
    http.assert_done();
}

#[test]
fn clone_of_an_unadvertised_ref_is_a_sync_error() {
    let adv = advertisement(
        "git-upload-pack",
        &[&format!(
            "{} refs/heads/master\0agent=git/2.46.0",
            oid_of('1').to_hex()
        )],
    );
    let mut http = ScriptedTransport::new().on_get("info/refs", adv);
    let mut store = MemoryStore::new();
    let (mut progress, mut errors) = (Vec::new(), Vec::new());

    let err = clone(
        &mut http,
        &mut store,
        &endpoint(),
        &FetchOptions::default(),
        "refs/heads/missing".into(),
        "refs/heads/missing".into(),
        sinks(&mut progress, &mut errors),
    )
    .unwrap_err();

    match err {
        Error::Sync(message) => assert!(message.starts_with("Unexpected result:"), "{message}"),
        other => panic!("expected Sync, got {other:?}"),
    }
    assert!(store.refs.is_empty());
}

#[test]
fn fetch_one_of_an_absent_ref_is_up_to_date() {
    let adv = advertisement(
        "git-upload-pack",
        &[&format!(
            "{} refs/heads/master\0multi_ack_detailed agent=git/2.46.0",
            oid_of('1').to_hex()
        )],
    );
    let mut http = ScriptedTransport::new().on_get("info/refs", adv);
    let mut store = MemoryStore::new();
    let (mut progress, mut errors) = (Vec::new(), Vec::new());

    let outcome = fetch_one(
        &mut http,
        &mut store,
        &endpoint(),
        &FetchOptions::default(),
        "refs/heads/gone".into(),
        &[BString::from("refs/remotes/origin/gone")],
        HashSet::new(),
        &mut AlwaysDone,
        sinks(&mut progress, &mut errors),
    )
    .unwrap();

    assert_eq!(outcome, FetchOutcome::UpToDate);
    // No POST was issued for the empty selection.
    assert_eq!(http.requests.len(), 1);
}

#[test]
fn fetch_some_writes_every_mapped_local_ref() {
    let h1 = oid_of('1');
    let h2 = oid_of('2');
    let adv = advertisement(
        "git-upload-pack",
        &[
            &format!(
                "{} refs/heads/master\0multi_ack_detailed side-band-64k agent=git/2.46.0",
                h1.to_hex()
            ),
            &format!("{} refs/heads/feature", h2.to_hex()),
        ],
    );
    let mut http = ScriptedTransport::new()
        .on_get("info/refs", adv)
        .on_post("/git-upload-pack", pack_response(b"PACK-SOME"));
    let mut store = MemoryStore::new();
    let (mut progress, mut errors) = (Vec::new(), Vec::new());

    let mut map = RefMap::new();
    map.insert("refs/heads/master", "refs/remotes/origin/master");
    map.insert("refs/heads/master", "refs/heads/master");

    let outcome = fetch_some(
        &mut http,
        &mut store,
        &endpoint(),
        &FetchOptions::default(),
        &map,
        HashSet::new(),
        &mut AlwaysDone,
        sinks(&mut progress, &mut errors),
    )
    .unwrap();

    match outcome {
        FetchOutcome::Updated(updated) => {
            assert_eq!(
                updated,
                vec![
                    (BString::from("refs/remotes/origin/master"), h1),
                    (BString::from("refs/heads/master"), h1),
                ]
            );
        }
        other => panic!("expected updates, got {other:?}"),
    }
    assert_eq!(store.ref_target("refs/heads/master"), Some(&RefTarget::Id(h1)));
    assert_eq!(store.ref_target("refs/remotes/origin/feature"), None);
}

#[test]
fn fetch_all_skips_refs_without_a_local_mapping() {
    let h1 = oid_of('1');
    let h2 = oid_of('2');
    let adv = advertisement(
        "git-upload-pack",
        &[
            &format!(
                "{} refs/heads/master\0multi_ack_detailed side-band-64k agent=git/2.46.0",
                h1.to_hex()
            ),
            &format!("{} refs/heads/feature", h2.to_hex()),
        ],
    );
    let mut http = ScriptedTransport::new()
        .on_get("info/refs", adv)
        .on_post("/git-upload-pack", pack_response(b"PACK-ALL"));
    let mut store = MemoryStore::new();
    let (mut progress, mut errors) = (Vec::new(), Vec::new());

    let mut map = RefMap::new();
    map.insert("refs/heads/master", "refs/remotes/origin/master");

    let outcome = fetch_all(
        &mut http,
        &mut store,
        &endpoint(),
        &FetchOptions::default(),
        &map,
        HashSet::new(),
        &mut AlwaysDone,
        sinks(&mut progress, &mut errors),
    )
    .unwrap();

    // Both refs were downloaded, but only the mapped one got a local name;
    // the unmapped one is skipped without failing the fetch.
    assert_eq!(
        outcome,
        FetchOutcome::Updated(vec![(BString::from("refs/remotes/origin/master"), h1)])
    );
    assert_eq!(store.refs.len(), 1);
}

#[test]
fn update_and_create_maps_report_onto_commands() {
    let h1 = oid_of('1');
    let h2 = oid_of('2');
    let adv = advertisement(
        "git-receive-pack",
        &[&format!(
            "{} refs/heads/main\0report-status delete-refs agent=git/2.46.0",
            h1.to_hex()
        )],
    );
    let mut response = pkt_str("unpack ok\n");
    response.extend(pkt_str("ok refs/heads/main\n"));
    response.extend_from_slice(FLUSH);
    let mut http = ScriptedTransport::new()
        .on_get("info/refs", adv)
        .on_post("/git-receive-pack", response);
    let mut store = MemoryStore::new();

    let mut references = RefMap::new();
    references.insert("refs/heads/main", "refs/heads/main");

    let mut packer = |_: &PackConfig,
                      _: &MemoryStore,
                      _: &[Ref],
                      _: &[Command]|
     -> Result<Box<dyn Read>, Box<dyn std::error::Error + Send + Sync>> {
        Ok(Box::new(&b"PACK-UP"[..]))
    };

    let outcomes = update_and_create(
        &mut http,
        &mut store,
        &endpoint(),
        &PushOptions::default(),
        &references,
        |_store, references, advertised| {
            advertised
                .iter()
                .filter(|reference| references.contains(reference.name.as_ref()))
                .map(|reference| Command::Update {
                    old: reference.target,
                    new: h2,
                    name: reference.name.clone(),
                })
                .collect()
        },
        &mut packer,
    )
    .unwrap();

    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].status, RefStatus::Ok);
    match &outcomes[0].command {
        Command::Update { old, new, name } => {
            assert_eq!(*old, h1);
            assert_eq!(*new, h2);
            assert_eq!(name, "refs/heads/main");
        }
        other => panic!("expected an update, got {other:?}"),
    }
    http.assert_done();
}
