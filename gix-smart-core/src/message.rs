//! The typed messages exchanged with a smart HTTP server.

use crate::capabilities::CapabilitySet;
use bstr::BString;
use gix_hash::ObjectId;

/// A reference as advertised by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ref {
    /// The full reference name (e.g. `refs/heads/main`).
    pub name: BString,
    /// The object the reference points to.
    pub target: ObjectId,
    /// The peeled target of an annotated tag, if the server supplied one.
    pub peeled: Option<ObjectId>,
}

/// The parsed result of reference discovery.
///
/// The capability set is always present, even when the repository is empty
/// and the server sent only the `capabilities^{}` placeholder line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefAdvertisement {
    /// All advertised references in server order.
    pub refs: Vec<Ref>,
    /// The server's capability set.
    pub capabilities: CapabilitySet,
    /// Shallow boundaries the server advertised.
    pub shallow: Vec<ObjectId>,
}

/// A single ref update sent during a push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Create a new reference pointing at `new`.
    Create {
        /// The object the reference will point at.
        new: ObjectId,
        /// The full reference name.
        name: BString,
    },
    /// Delete an existing reference which had `old`.
    Delete {
        /// The object the reference pointed at.
        old: ObjectId,
        /// The full reference name.
        name: BString,
    },
    /// Update an existing reference from `old` to `new`.
    Update {
        /// The previously known target.
        old: ObjectId,
        /// The new target.
        new: ObjectId,
        /// The full reference name.
        name: BString,
    },
}

impl Command {
    /// The refname targeted by this command.
    pub fn name(&self) -> &BString {
        match self {
            Command::Create { name, .. } | Command::Delete { name, .. } | Command::Update { name, .. } => name,
        }
    }
}

/// A fetch negotiation request as sent in one POST round.
#[derive(Debug, Clone, Default)]
pub struct UploadRequest {
    /// The objects the client wants; must be non-empty when sent.
    pub wants: Vec<ObjectId>,
    /// The objects the client already has, in this round.
    pub haves: Vec<ObjectId>,
    /// Shallow boundaries known to the client.
    pub shallow: Vec<ObjectId>,
    /// Optional history truncation depth.
    pub deepen: Option<u32>,
    /// The capabilities to activate, sent on the first want line.
    pub capabilities: CapabilitySet,
}

/// How a negotiation round is terminated on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminator {
    /// End the round with a flush pkt; the server answers with acks only.
    Flush,
    /// End negotiation with a `done` line; the server answers with the pack.
    Done,
}

/// A push update-request: the header that precedes the pack stream.
#[derive(Debug, Clone, Default)]
pub struct UpdateRequest {
    /// Shallow boundaries known to the client.
    pub shallow: Vec<ObjectId>,
    /// The ref update commands, in advertised order; must be non-empty.
    pub commands: Vec<Command>,
    /// The capabilities to activate, sent on the first command line.
    pub capabilities: CapabilitySet,
}

/// The qualifier attached to a server `ACK`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckStatus {
    /// A plain `ACK <oid>` terminating negotiation.
    Plain,
    /// `ACK <oid> continue` (basic multi-ack).
    Continue,
    /// `ACK <oid> common` (detailed multi-ack).
    Common,
    /// `ACK <oid> ready`: the server can produce a pack now.
    Ready,
}

/// The acknowledgements read in one negotiation round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Acks {
    /// Acknowledged object ids with their qualifier, in wire order.
    pub acks: Vec<(ObjectId, AckStatus)>,
    /// `shallow` lines interleaved with the acks.
    pub shallow: Vec<ObjectId>,
    /// `unshallow` lines interleaved with the acks.
    pub unshallow: Vec<ObjectId>,
}

impl Acks {
    /// Iterate over all acknowledged object ids.
    pub fn ids(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.acks.iter().map(|(id, _)| *id)
    }

    /// Return `true` if any ack carries the `ready` qualifier.
    pub fn is_ready(&self) -> bool {
        self.acks.iter().any(|(_, status)| *status == AckStatus::Ready)
    }
}

/// The single line closing a negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationResult {
    /// The server found no (new) common base.
    Nak,
    /// The server settled on this common object.
    Ack(ObjectId),
}

/// One frame of the multiplexed pack phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BandFrame {
    /// Pack data (channel 1, or the raw stream without side-band).
    Data(Vec<u8>),
    /// Progress output for the user (channel 2).
    Progress(Vec<u8>),
    /// Server error output (channel 3).
    Error(Vec<u8>),
    /// The stream ended.
    End,
}

/// The status the server reported for one pushed ref.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefStatus {
    /// The update was applied (`ok <ref>`).
    Ok,
    /// The update was rejected (`ng <ref> <reason>`).
    Rejected(String),
}

/// The parsed report-status response to a push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportStatus {
    /// The outcome of unpacking the sent pack: `Ok` or the server's error.
    pub unpack: Result<(), String>,
    /// Per-ref statuses in wire order.
    pub commands: Vec<(BString, RefStatus)>,
}

impl ReportStatus {
    /// Look up the status reported for a refname.
    pub fn status_of(&self, name: &BString) -> Option<&RefStatus> {
        self.commands
            .iter()
            .find_map(|(reported, status)| (reported == name).then_some(status))
    }
}

/// Any message the decoder can produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// A full reference discovery advertisement.
    Advertisement(RefAdvertisement),
    /// The acknowledgements of one negotiation round.
    Acks(Acks),
    /// The line closing a negotiation.
    NegotiationResult(NegotiationResult),
    /// One frame of the pack phase.
    Band(BandFrame),
    /// The report-status response to a push.
    ReportStatus(ReportStatus),
}
