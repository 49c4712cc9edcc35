//! The negotiation strategy boundary.
//!
//! The fetch driver runs the wire protocol; deciding *what* to claim as
//! common ancestry is delegated through [`Negotiator`]. Strategies keep
//! their own state between rounds.

use gix_hash::ObjectId;
use gix_smart_core::message::Acks;
use std::collections::HashSet;

/// What the strategy wants the driver to do after a round of acks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Negotiation {
    /// The server signalled it can build a pack; read it.
    Ready,
    /// Claim these additional haves and run another round.
    Again(HashSet<ObjectId>),
    /// Nothing further to offer; finish with a `done` round.
    Done,
}

/// A pluggable negotiation strategy.
pub trait Negotiator {
    /// Decide how to continue after one round of server acknowledgements.
    fn negotiate(&mut self, acks: &Acks) -> Negotiation;
}

impl<N: Negotiator + ?Sized> Negotiator for &mut N {
    fn negotiate(&mut self, acks: &Acks) -> Negotiation {
        (**self).negotiate(acks)
    }
}

/// A strategy that offers pre-computed candidate haves in batches.
///
/// It answers `Ready` as soon as the server acks with `ready`, keeps
/// offering the next batch while candidates remain, and falls back to
/// `Done` once the backlog is exhausted.
pub struct BatchNegotiator {
    backlog: Vec<ObjectId>,
    batch_size: usize,
}

impl BatchNegotiator {
    /// Offer `candidates` in batches of `batch_size`.
    pub fn new(candidates: Vec<ObjectId>, batch_size: usize) -> Self {
        Self {
            backlog: candidates,
            batch_size: batch_size.max(1),
        }
    }
}

impl Negotiator for BatchNegotiator {
    fn negotiate(&mut self, acks: &Acks) -> Negotiation {
        if acks.is_ready() {
            return Negotiation::Ready;
        }
        if self.backlog.is_empty() {
            return Negotiation::Done;
        }
        let take = self.batch_size.min(self.backlog.len());
        let batch = self.backlog.drain(..take).collect();
        Negotiation::Again(batch)
    }
}
