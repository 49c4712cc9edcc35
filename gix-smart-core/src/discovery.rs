//! The reference discovery exchange shared by fetch and push.

use crate::bridge::MessageReader;
use crate::capabilities::CapabilitySet;
use crate::decode::{self, Decoder, Expect};
use crate::endpoint::{request_headers, Endpoint, Purpose};
use crate::error::{Error, Result};
use crate::http::HttpClient;
use crate::message::{Message, RefAdvertisement};
use crate::service::Service;

/// GET the discovery URL and decode the advertisement with `decoder`.
///
/// Decoder `ERR` payloads surface as [`Error::Sync`] with the server's
/// message; structural decode failures also map to [`Error::Sync`], carrying
/// the raw response bytes, because some servers answer discovery with a
/// plain error page rather than pkt-lines.
pub fn read_advertisement<H: HttpClient>(
    http: &mut H,
    endpoint: &Endpoint,
    capabilities: &CapabilitySet,
    service: Service,
    decoder: &mut Decoder,
) -> Result<RefAdvertisement> {
    let headers = request_headers(endpoint, capabilities, Purpose::Discovery(service))?;
    let url = endpoint.discovery_url(service);
    tracing::debug!(url = %url, service = %service, "reference discovery");

    let mut body = http.get(&url, &headers)?;
    decoder.expect(Expect::ReferenceDiscovery(service));
    let mut reader = MessageReader::new(decoder, &mut body);
    match reader.next_message() {
        Ok(Message::Advertisement(advertisement)) => {
            tracing::debug!(
                refs = advertisement.refs.len(),
                capabilities = advertisement.capabilities.len(),
                "advertisement received"
            );
            Ok(advertisement)
        }
        Ok(other) => Err(Error::Smart(decode::Error::UnexpectedMessage {
            message: format!("expected an advertisement, got {other:?}"),
        })),
        Err(Error::Smart(decode::Error::Server(message))) => Err(Error::Sync(message)),
        Err(Error::Smart(_)) => Err(Error::sync_from_bytes(&reader.into_diagnostic())),
        Err(other) => Err(other),
    }
}
