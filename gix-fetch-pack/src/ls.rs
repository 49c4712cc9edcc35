//! Discovery-only listing of remote refs.

use bstr::{BStr, ByteSlice};
use gix_smart_core::capabilities::CapabilitySet;
use gix_smart_core::decode::Decoder;
use gix_smart_core::discovery::read_advertisement;
use gix_smart_core::endpoint::Endpoint;
use gix_smart_core::error::Result;
use gix_smart_core::http::HttpClient;
use gix_smart_core::message::Ref;
use gix_smart_core::Service;

/// List the refs advertised by the remote, nothing more.
pub fn ls_remote<H: HttpClient>(
    http: &mut H,
    endpoint: &Endpoint,
    capabilities: &CapabilitySet,
) -> Result<Vec<Ref>> {
    let mut decoder = Decoder::new();
    let advertisement = read_advertisement(http, endpoint, capabilities, Service::UploadPack, &mut decoder)?;
    Ok(advertisement.refs)
}

/// Select advertised refs whose name is in `names`, preserving server order.
pub fn select_by_name(advertised: &[Ref], names: &[&BStr]) -> Vec<Ref> {
    advertised
        .iter()
        .filter(|reference| names.iter().any(|name| reference.name.as_bstr() == *name))
        .cloned()
        .collect()
}
