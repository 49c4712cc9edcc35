//! End-to-end push flows against a scripted transport.

use gix_hash::ObjectId;
use gix_send_pack::pack::PackConfig;
use gix_send_pack::{push, Options};
use gix_smart_core::error::Error;
use gix_smart_core::message::{Command, Ref, RefStatus};
use gix_smart_core::Endpoint;
use gix_smart_testtools::{
    advertisement, band, oid_of, parse_update_request, pkt_str, MemoryStore, ScriptedTransport, FLUSH,
};
use std::io::Read;

fn endpoint() -> Endpoint {
    Endpoint::parse("https://example.com/repo.git").unwrap()
}

fn fixture_packer(
    bytes: &'static [u8],
) -> impl FnMut(
    &PackConfig,
    &MemoryStore,
    &[Ref],
    &[Command],
) -> Result<Box<dyn Read>, Box<dyn std::error::Error + Send + Sync>> {
    move |_, _, _, _| Ok(Box::new(bytes))
}

fn report_response(lines: &[&str]) -> Vec<u8> {
    let mut inner = Vec::new();
    for line in lines {
        inner.extend(pkt_str(&format!("{line}\n")));
    }
    inner.extend_from_slice(FLUSH);
    let mut response = band(1, &inner);
    response.extend_from_slice(FLUSH);
    response
}

#[test]
fn create_and_update_both_succeed() {
    let hc = oid_of('c');
    let hu_old = oid_of('1');
    let hu_new = oid_of('2');

    let adv = advertisement(
        "git-receive-pack",
        &[&format!(
            "{} refs/heads/main\0report-status delete-refs side-band-64k ofs-delta agent=git/2.46.0",
            hu_old.to_hex()
        )],
    );
    let response = report_response(&["unpack ok", "ok refs/heads/topic", "ok refs/heads/main"]);
    let mut http = ScriptedTransport::new()
        .on_get("info/refs?service=git-receive-pack", adv)
        .on_post("/git-receive-pack", response);
    let mut store = MemoryStore::new();

    let outcomes = push(
        &mut http,
        &mut store,
        &endpoint(),
        &Options::default(),
        |_, _| {
            vec![
                Command::Create {
                    new: hc,
                    name: "refs/heads/topic".into(),
                },
                Command::Update {
                    old: hu_old,
                    new: hu_new,
                    name: "refs/heads/main".into(),
                },
            ]
        },
        &mut fixture_packer(b"PACK-PUSH"),
    )
    .unwrap();

    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(|outcome| outcome.status == RefStatus::Ok));
    http.assert_done();

    let posts: Vec<_> = http.requests.iter().filter(|r| r.method == "POST").collect();
    assert_eq!(posts.len(), 1);
    assert_eq!(
        posts[0].header("Content-Type"),
        Some("application/x-git-receive-pack-request")
    );

    let request = parse_update_request(&posts[0].body);
    assert_eq!(request.commands.len(), 2);
    let zero = ObjectId::null(gix_hash::Kind::Sha1);
    assert_eq!(request.commands[0], (zero, hc, "refs/heads/topic".into()));
    assert_eq!(request.commands[1], (hu_old, hu_new, "refs/heads/main".into()));
    assert!(request.capabilities.iter().any(|c| c == "report-status"));
    assert_eq!(request.pack, b"PACK-PUSH");
}

#[test]
fn rejected_command_is_returned_not_raised() {
    let adv = advertisement(
        "git-receive-pack",
        &[&format!(
            "{} refs/heads/main\0report-status side-band-64k agent=git/2.46.0",
            oid_of('1').to_hex()
        )],
    );
    let response = report_response(&["unpack ok", "ng refs/heads/main non-fast-forward"]);
    let mut http = ScriptedTransport::new()
        .on_get("info/refs", adv)
        .on_post("/git-receive-pack", response);
    let mut store = MemoryStore::new();

    let outcomes = push(
        &mut http,
        &mut store,
        &endpoint(),
        &Options::default(),
        |_, _| {
            vec![Command::Update {
                old: oid_of('1'),
                new: oid_of('2'),
                name: "refs/heads/main".into(),
            }]
        },
        &mut fixture_packer(b"PACK-PUSH"),
    )
    .unwrap();

    assert_eq!(outcomes.len(), 1);
    assert_eq!(
        outcomes[0].status,
        RefStatus::Rejected("non-fast-forward".into())
    );
}

#[test]
fn unpack_failure_is_a_sync_error() {
    let adv = advertisement(
        "git-receive-pack",
        &[&format!(
            "{} refs/heads/main\0report-status agent=git/2.46.0",
            oid_of('1').to_hex()
        )],
    );
    // Without side-band in common, the report arrives as plain pkt-lines.
    let mut response = pkt_str("unpack index-pack abnormal exit\n");
    response.extend_from_slice(FLUSH);
    let mut http = ScriptedTransport::new()
        .on_get("info/refs", adv)
        .on_post("/git-receive-pack", response);
    let mut store = MemoryStore::new();

    let err = push(
        &mut http,
        &mut store,
        &endpoint(),
        &Options::default(),
        |_, _| {
            vec![Command::Update {
                old: oid_of('1'),
                new: oid_of('2'),
                name: "refs/heads/main".into(),
            }]
        },
        &mut fixture_packer(b"PACK-PUSH"),
    )
    .unwrap_err();

    match err {
        Error::Sync(message) => assert_eq!(message, "index-pack abnormal exit"),
        other => panic!("expected Sync, got {other:?}"),
    }
}

#[test]
fn empty_command_list_skips_the_post() {
    let adv = advertisement(
        "git-receive-pack",
        &[&format!(
            "{} refs/heads/main\0report-status agent=git/2.46.0",
            oid_of('1').to_hex()
        )],
    );
    let mut http = ScriptedTransport::new().on_get("info/refs", adv);
    let mut store = MemoryStore::new();

    let outcomes = push(
        &mut http,
        &mut store,
        &endpoint(),
        &Options::default(),
        |_, _| Vec::new(),
        &mut fixture_packer(b"UNUSED"),
    )
    .unwrap();

    assert!(outcomes.is_empty());
    assert_eq!(http.requests.len(), 1);
    http.assert_done();
}

#[test]
fn delete_only_push_sends_an_empty_pack() {
    let adv = advertisement(
        "git-receive-pack",
        &[&format!(
            "{} refs/tags/v1\0report-status delete-refs agent=git/2.46.0",
            oid_of('1').to_hex()
        )],
    );
    let mut response = pkt_str("unpack ok\n");
    response.extend(pkt_str("ok refs/tags/v1\n"));
    response.extend_from_slice(FLUSH);
    let mut http = ScriptedTransport::new()
        .on_get("info/refs", adv)
        .on_post("/git-receive-pack", response);
    let mut store = MemoryStore::new();

    let outcomes = push(
        &mut http,
        &mut store,
        &endpoint(),
        &Options::default(),
        |_, _| {
            vec![Command::Delete {
                old: oid_of('1'),
                name: "refs/tags/v1".into(),
            }]
        },
        &mut fixture_packer(b""),
    )
    .unwrap();

    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].status, RefStatus::Ok);

    let request = parse_update_request(&http.requests[1].body);
    assert!(request.pack.is_empty());
    let zero = ObjectId::null(gix_hash::Kind::Sha1);
    assert_eq!(request.commands[0], (oid_of('1'), zero, "refs/tags/v1".into()));
}
