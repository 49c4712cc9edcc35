//! The contract the local object store must fulfil.

use bstr::{BStr, BString};
use gix_hash::ObjectId;
use std::io::Read;

/// The name of the symbolic HEAD reference.
pub const HEAD: &str = "HEAD";

/// What a reference points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefTarget {
    /// A direct reference to an object.
    Id(ObjectId),
    /// A symbolic reference to another refname.
    Symbolic(BString),
}

/// A local object store capable of ingesting packs and updating refs.
///
/// Pack ingestion is atomic at the pack-completion boundary: a failed or
/// aborted ingestion must leave no partial objects behind, which is what
/// lets the drivers guarantee that ref writes only ever follow a fully
/// landed pack.
pub trait Store {
    /// The store's own error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Read a complete pack from `pack` and index it.
    ///
    /// Returns the pack checksum and the number of objects it contained.
    fn ingest_pack(&mut self, pack: &mut dyn Read) -> Result<(ObjectId, u64), Self::Error>;

    /// Point the reference `name` at `target`, creating it if needed.
    fn write_ref(&mut self, name: &BStr, target: RefTarget) -> Result<(), Self::Error>;
}

impl<S: Store + ?Sized> Store for &mut S {
    type Error = S::Error;

    fn ingest_pack(&mut self, pack: &mut dyn Read) -> Result<(ObjectId, u64), Self::Error> {
        (**self).ingest_pack(pack)
    }

    fn write_ref(&mut self, name: &BStr, target: RefTarget) -> Result<(), Self::Error> {
        (**self).write_ref(name, target)
    }
}
