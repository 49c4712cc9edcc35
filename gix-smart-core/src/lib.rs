//! gix-smart-core: Shared client-side primitives for Git's smart HTTP
//! transport.
//!
//! This crate provides the building blocks used by `gix-fetch-pack`,
//! `gix-send-pack` and the `gix-smart-http` orchestrator: endpoint and URL
//! composition, capability handling, the pkt-line request encoder and
//! response decoder, the adapters that couple both to streaming HTTP
//! bodies, and the contracts the HTTP client and object store collaborators
//! must fulfil.

#![deny(missing_docs, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod bridge;
pub mod capabilities;
pub mod decode;
pub mod discovery;
pub mod encode;
pub mod endpoint;
pub mod error;
pub mod http;
pub mod message;
pub mod service;
pub mod store;

pub use capabilities::{Capability, CapabilitySet, MultiAckMode, SideBandMode};
pub use endpoint::Endpoint;
pub use error::{Error, Result};
pub use message::{
    Acks, AckStatus, BandFrame, Command, Message, NegotiationResult, Ref, RefAdvertisement, RefStatus,
    ReportStatus, Terminator, UpdateRequest, UploadRequest,
};
pub use service::Service;
