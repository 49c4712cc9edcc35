//! gix-fetch-pack: the client of `git-upload-pack` over smart HTTP.
//!
//! Performs reference discovery, drives the have/want negotiation through a
//! pluggable [`negotiate::Negotiator`], demultiplexes the side-band pack
//! phase, and streams the pack into the caller's object store.

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod demux;
pub mod fetch;
pub mod ls;
pub mod negotiate;

pub use demux::{PackStream, Sinks};
pub use fetch::{fetch, Options};
pub use ls::{ls_remote, select_by_name};
pub use negotiate::{BatchNegotiator, Negotiation, Negotiator};
