//! Capability parsing, formatting, and the intersection that drives mode
//! selection.
//!
//! Capabilities compare structurally: two `agent` entries with different
//! strings are distinct values, so the intersection of a client and a server
//! set normally drops `agent` entirely. That is intended — the client's own
//! agent travels in the `User-Agent` header, not in the negotiated set.

use bstr::{BStr, BString, ByteSlice};
use smallvec::SmallVec;

/// One capability token as advertised by a peer or requested by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capability {
    /// Basic multi-ack negotiation.
    MultiAck,
    /// Detailed multi-ack with `common`/`ready` qualifiers.
    MultiAckDetailed,
    /// The pack may reference objects the receiver already has.
    ThinPack,
    /// Basic side-band multiplexing (up to 1000 byte frames).
    SideBand,
    /// Side-band multiplexing with 64k frames.
    SideBand64k,
    /// Offset deltas in the pack.
    OfsDelta,
    /// Peer software identification.
    Agent(BString),
    /// Symbolic ref hint, e.g. `HEAD` pointing at a branch.
    SymRef {
        /// The symbolic reference name.
        name: BString,
        /// The reference it points at.
        target: BString,
    },
    /// Per-command status report after a push.
    ReportStatus,
    /// The server accepts ref deletions.
    DeleteRefs,
    /// Negotiation may end without an explicit `done`.
    NoDone,
    /// Suppress progress output.
    NoProgress,
    /// Include annotated tags pointing into the pack.
    IncludeTag,
    /// Shallow clients are supported.
    Shallow,
    /// `deepen-since` is supported.
    DeepenSince,
    /// `deepen-not` is supported.
    DeepenNot,
    /// `deepen-relative` is supported.
    DeepenRelative,
    /// Suppress server side chatter during a push.
    Quiet,
    /// All-or-nothing ref updates on push.
    Atomic,
    /// Push options are accepted.
    PushOptions,
    /// Wants may name any ref tip.
    AllowTipSha1InWant,
    /// Wants may name any reachable object.
    AllowReachableSha1InWant,
    /// Any token this implementation does not know about.
    Other(BString),
}

impl Capability {
    /// Parse a single capability token.
    ///
    /// Unknown tokens are preserved verbatim as [`Capability::Other`] so a
    /// future peer cannot break discovery.
    pub fn parse(token: &BStr) -> Capability {
        if let Some(agent) = token.strip_prefix(b"agent=") {
            return Capability::Agent(agent.as_bstr().to_owned());
        }
        if let Some(spec) = token.strip_prefix(b"symref=") {
            if let Some(colon) = spec.find_byte(b':') {
                return Capability::SymRef {
                    name: spec[..colon].as_bstr().to_owned(),
                    target: spec[colon + 1..].as_bstr().to_owned(),
                };
            }
            return Capability::Other(token.to_owned());
        }
        match token.as_bytes() {
            b"multi_ack" => Capability::MultiAck,
            b"multi_ack_detailed" => Capability::MultiAckDetailed,
            b"thin-pack" => Capability::ThinPack,
            b"side-band" => Capability::SideBand,
            b"side-band-64k" => Capability::SideBand64k,
            b"ofs-delta" => Capability::OfsDelta,
            b"report-status" => Capability::ReportStatus,
            b"delete-refs" => Capability::DeleteRefs,
            b"no-done" => Capability::NoDone,
            b"no-progress" => Capability::NoProgress,
            b"include-tag" => Capability::IncludeTag,
            b"shallow" => Capability::Shallow,
            b"deepen-since" => Capability::DeepenSince,
            b"deepen-not" => Capability::DeepenNot,
            b"deepen-relative" => Capability::DeepenRelative,
            b"quiet" => Capability::Quiet,
            b"atomic" => Capability::Atomic,
            b"push-options" => Capability::PushOptions,
            b"allow-tip-sha1-in-want" => Capability::AllowTipSha1InWant,
            b"allow-reachable-sha1-in-want" => Capability::AllowReachableSha1InWant,
            _ => Capability::Other(token.to_owned()),
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Capability::MultiAck => f.write_str("multi_ack"),
            Capability::MultiAckDetailed => f.write_str("multi_ack_detailed"),
            Capability::ThinPack => f.write_str("thin-pack"),
            Capability::SideBand => f.write_str("side-band"),
            Capability::SideBand64k => f.write_str("side-band-64k"),
            Capability::OfsDelta => f.write_str("ofs-delta"),
            Capability::Agent(agent) => write!(f, "agent={agent}"),
            Capability::SymRef { name, target } => write!(f, "symref={name}:{target}"),
            Capability::ReportStatus => f.write_str("report-status"),
            Capability::DeleteRefs => f.write_str("delete-refs"),
            Capability::NoDone => f.write_str("no-done"),
            Capability::NoProgress => f.write_str("no-progress"),
            Capability::IncludeTag => f.write_str("include-tag"),
            Capability::Shallow => f.write_str("shallow"),
            Capability::DeepenSince => f.write_str("deepen-since"),
            Capability::DeepenNot => f.write_str("deepen-not"),
            Capability::DeepenRelative => f.write_str("deepen-relative"),
            Capability::Quiet => f.write_str("quiet"),
            Capability::Atomic => f.write_str("atomic"),
            Capability::PushOptions => f.write_str("push-options"),
            Capability::AllowTipSha1InWant => f.write_str("allow-tip-sha1-in-want"),
            Capability::AllowReachableSha1InWant => f.write_str("allow-reachable-sha1-in-want"),
            Capability::Other(token) => write!(f, "{token}"),
        }
    }
}

/// An unordered collection of capabilities.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilitySet {
    inner: SmallVec<[Capability; 8]>,
}

impl CapabilitySet {
    /// An empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// The capability list a modern fetch/push client starts from, carrying
    /// the given agent string.
    pub fn client_defaults(agent: impl Into<BString>) -> Self {
        [
            Capability::MultiAckDetailed,
            Capability::MultiAck,
            Capability::SideBand64k,
            Capability::SideBand,
            Capability::ThinPack,
            Capability::OfsDelta,
            Capability::ReportStatus,
            Capability::Agent(agent.into()),
        ]
        .into_iter()
        .collect()
    }

    /// Parse a NUL-separated capability suffix of an advertisement line:
    /// space-separated tokens.
    pub fn parse(tokens: &BStr) -> Self {
        tokens
            .fields()
            .map(|token| Capability::parse(token.as_bstr()))
            .collect()
    }

    /// Add a capability.
    pub fn push(&mut self, capability: Capability) {
        self.inner.push(capability);
    }

    /// Return `true` if the capability is present, compared structurally.
    pub fn contains(&self, capability: &Capability) -> bool {
        self.inner.contains(capability)
    }

    /// Iterate over the contained capabilities.
    pub fn iter(&self) -> impl Iterator<Item = &Capability> {
        self.inner.iter()
    }

    /// The number of capabilities in the set.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Return `true` if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// The set of capabilities present in both `self` and `other`.
    ///
    /// Comparison is structural, so differing `agent` entries drop out.
    pub fn intersect(&self, other: &CapabilitySet) -> CapabilitySet {
        self.inner
            .iter()
            .filter(|capability| other.contains(capability))
            .cloned()
            .collect()
    }

    /// The agent string, if an `agent` entry is present.
    pub fn agent(&self) -> Option<&BStr> {
        self.inner.iter().find_map(|capability| match capability {
            Capability::Agent(agent) => Some(agent.as_bstr()),
            _ => None,
        })
    }

    /// The side-band mode this set selects, preferring 64k frames.
    pub fn side_band_mode(&self) -> SideBandMode {
        if self.contains(&Capability::SideBand64k) {
            SideBandMode::SideBand64k
        } else if self.contains(&Capability::SideBand) {
            SideBandMode::Basic
        } else {
            SideBandMode::None
        }
    }

    /// The multi-ack mode this set selects, preferring detailed acks.
    pub fn ack_mode(&self) -> MultiAckMode {
        if self.contains(&Capability::MultiAckDetailed) {
            MultiAckMode::Detailed
        } else if self.contains(&Capability::MultiAck) {
            MultiAckMode::Basic
        } else {
            MultiAckMode::None
        }
    }

    /// Narrow an intersection to what a request may actually carry: when
    /// both levels of a tiered capability survived, only the selected one
    /// is requested, since peers reject conflicting mode tokens.
    pub fn negotiated(&self) -> CapabilitySet {
        let side_band = self.side_band_mode();
        let ack = self.ack_mode();
        self.inner
            .iter()
            .filter(|capability| match capability {
                Capability::SideBand => side_band != SideBandMode::SideBand64k,
                Capability::MultiAck => ack != MultiAckMode::Detailed,
                _ => true,
            })
            .cloned()
            .collect()
    }

    /// Render the set as the space-separated token list used on the wire.
    pub fn to_wire(&self) -> BString {
        let mut out = BString::default();
        for (index, capability) in self.inner.iter().enumerate() {
            if index > 0 {
                out.push(b' ');
            }
            out.extend_from_slice(capability.to_string().as_bytes());
        }
        out
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Self {
            inner: iter.into_iter().collect(),
        }
    }
}

/// Side-band modes for multiplexed pack transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SideBandMode {
    /// No side-band; pack bytes arrive raw.
    #[default]
    None,
    /// Basic side-band (up to 1000 byte packets).
    Basic,
    /// Side-band with 64k packets.
    SideBand64k,
}

impl SideBandMode {
    /// The largest payload a single band packet can carry in this mode, or
    /// `None` when side-band is off.
    pub fn max_data_size(&self) -> Option<usize> {
        match self {
            SideBandMode::None => None,
            SideBandMode::Basic => Some(999),
            SideBandMode::SideBand64k => Some(65519),
        }
    }
}

/// Multi-ack modes for negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MultiAckMode {
    /// Plain single ACK/NAK negotiation.
    #[default]
    None,
    /// Basic multi-ack with `continue` qualifiers.
    Basic,
    /// Detailed multi-ack with `common` and `ready` qualifiers.
    Detailed,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(tokens: &str) -> CapabilitySet {
        CapabilitySet::parse(tokens.as_bytes().as_bstr())
    }

    #[test]
    fn token_round_trip() {
        let tokens = "multi_ack_detailed side-band-64k thin-pack ofs-delta agent=git/2.46.0 symref=HEAD:refs/heads/main report-status";
        assert_eq!(set(tokens).to_wire(), tokens);
    }

    #[test]
    fn unknown_tokens_are_preserved() {
        let caps = set("object-format=sha1 fancy-new-thing");
        assert_eq!(caps.len(), 2);
        assert_eq!(caps.to_wire(), "object-format=sha1 fancy-new-thing");
    }

    #[test]
    fn intersection_is_structural_and_drops_differing_agents() {
        let client = CapabilitySet::client_defaults("git/gix-1.0");
        let server = set("multi_ack multi_ack_detailed side-band side-band-64k ofs-delta agent=git/2.46.0 report-status");
        let common = client.intersect(&server);

        assert!(common.contains(&Capability::MultiAckDetailed));
        assert!(common.contains(&Capability::SideBand64k));
        assert!(common.contains(&Capability::OfsDelta));
        assert!(common.agent().is_none());
        assert!(!common.contains(&Capability::ThinPack));
    }

    #[test]
    fn side_band_precedence_table() {
        assert_eq!(set("side-band side-band-64k").side_band_mode(), SideBandMode::SideBand64k);
        assert_eq!(set("side-band").side_band_mode(), SideBandMode::Basic);
        assert_eq!(set("ofs-delta").side_band_mode(), SideBandMode::None);
    }

    #[test]
    fn ack_mode_precedence_table() {
        assert_eq!(set("multi_ack multi_ack_detailed").ack_mode(), MultiAckMode::Detailed);
        assert_eq!(set("multi_ack").ack_mode(), MultiAckMode::Basic);
        assert_eq!(set("").ack_mode(), MultiAckMode::None);
    }

    #[test]
    fn negotiated_set_drops_the_unselected_tier() {
        let client = CapabilitySet::client_defaults("git/gix-1.0");
        let server = set("multi_ack multi_ack_detailed side-band side-band-64k ofs-delta thin-pack");
        let narrowed = client.intersect(&server).negotiated();

        assert!(narrowed.contains(&Capability::SideBand64k));
        assert!(!narrowed.contains(&Capability::SideBand));
        assert!(narrowed.contains(&Capability::MultiAckDetailed));
        assert!(!narrowed.contains(&Capability::MultiAck));
        assert!(narrowed.contains(&Capability::OfsDelta));
    }

    #[test]
    fn agent_extraction() {
        let caps = set("agent=git/2.46.0 ofs-delta");
        assert_eq!(caps.agent().expect("agent present"), "git/2.46.0");
    }
}
