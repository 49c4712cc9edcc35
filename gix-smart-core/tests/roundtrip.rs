//! Wire round-trip laws: what the encoder writes, a server parses back
//! identically.

use bstr::ByteSlice;
use gix_smart_core::capabilities::CapabilitySet;
use gix_smart_core::encode::{EncodeStep, Encoder};
use gix_smart_core::message::{Command, Terminator, UpdateRequest, UploadRequest};
use gix_smart_testtools::{oid_of, parse_update_request, parse_upload_request};

fn drain(mut encoder: Encoder) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let take = match encoder.step() {
            EncodeStep::Write(window) => {
                out.extend_from_slice(window);
                window.len()
            }
            EncodeStep::Done => break,
        };
        encoder.consume(take);
    }
    out
}

#[test]
fn upload_request_round_trips() {
    let request = UploadRequest {
        wants: vec![oid_of('1'), oid_of('2')],
        haves: vec![oid_of('3'), oid_of('4')],
        shallow: vec![oid_of('5')],
        deepen: Some(3),
        capabilities: CapabilitySet::parse(b"multi_ack_detailed side-band-64k thin-pack ofs-delta".as_bstr()),
    };

    for (terminator, done) in [(Terminator::Done, true), (Terminator::Flush, false)] {
        let wire = drain(Encoder::upload_request(&request, terminator));
        let parsed = parse_upload_request(&wire);

        assert_eq!(parsed.wants, request.wants);
        assert_eq!(parsed.haves, request.haves);
        assert_eq!(parsed.shallow, request.shallow);
        assert_eq!(parsed.deepen, request.deepen);
        assert_eq!(parsed.done, done);
        assert_eq!(
            parsed.capabilities,
            vec!["multi_ack_detailed", "side-band-64k", "thin-pack", "ofs-delta"]
        );
    }
}

#[test]
fn update_request_round_trips() {
    let request = UpdateRequest {
        shallow: vec![oid_of('7')],
        commands: vec![
            Command::Create {
                new: oid_of('1'),
                name: "refs/heads/topic".into(),
            },
            Command::Update {
                old: oid_of('2'),
                new: oid_of('3'),
                name: "refs/heads/main".into(),
            },
            Command::Delete {
                old: oid_of('4'),
                name: "refs/tags/v1".into(),
            },
        ],
        capabilities: CapabilitySet::parse(b"report-status delete-refs".as_bstr()),
    };

    let wire = drain(Encoder::update_request(&request));
    let parsed = parse_update_request(&wire);

    assert_eq!(parsed.shallow, request.shallow);
    assert_eq!(parsed.capabilities, vec!["report-status", "delete-refs"]);
    assert!(parsed.pack.is_empty());

    let zero = gix_hash::ObjectId::null(gix_hash::Kind::Sha1);
    assert_eq!(parsed.commands[0], (zero, oid_of('1'), "refs/heads/topic".into()));
    assert_eq!(parsed.commands[1], (oid_of('2'), oid_of('3'), "refs/heads/main".into()));
    assert_eq!(parsed.commands[2], (oid_of('4'), zero, "refs/tags/v1".into()));
}
