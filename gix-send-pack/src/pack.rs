//! The pack generation boundary of a push.

use gix_smart_core::message::{Command, Ref};
use std::io::Read;

/// The delta window used while packing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    /// Limit the window by object count.
    Objects(u32),
    /// Limit the window by memory use in bytes.
    Memory(u64),
}

/// How the outgoing pack is generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackConfig {
    /// The delta search window.
    pub window: Window,
    /// The maximum delta chain depth.
    pub depth: u32,
    /// Whether offset deltas may be used.
    pub ofs_delta: bool,
}

impl Default for PackConfig {
    fn default() -> Self {
        Self {
            window: Window::Objects(10),
            depth: 50,
            ofs_delta: true,
        }
    }
}

/// The pack generator callback invoked by the push driver.
///
/// Receives the store, the refs the server advertised, and the commands
/// about to be sent; returns the byte stream of a pack containing every
/// object the server is missing. A delete-only push returns an empty
/// stream.
pub trait PackGenerator<S: ?Sized> {
    /// Build the pack stream for one push.
    fn generate(
        &mut self,
        config: &PackConfig,
        store: &S,
        advertised: &[Ref],
        commands: &[Command],
    ) -> Result<Box<dyn Read>, Box<dyn std::error::Error + Send + Sync>>;
}

impl<S: ?Sized, F> PackGenerator<S> for F
where
    F: FnMut(
        &PackConfig,
        &S,
        &[Ref],
        &[Command],
    ) -> Result<Box<dyn Read>, Box<dyn std::error::Error + Send + Sync>>,
{
    fn generate(
        &mut self,
        config: &PackConfig,
        store: &S,
        advertised: &[Ref],
        commands: &[Command],
    ) -> Result<Box<dyn Read>, Box<dyn std::error::Error + Send + Sync>> {
        self(config, store, advertised, commands)
    }
}
