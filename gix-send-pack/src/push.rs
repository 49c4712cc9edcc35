//! The push driver: discovery, update-request plus pack upload,
//! report-status decoding.

use crate::pack::{PackConfig, PackGenerator};
use bstr::{BString, ByteSlice};
use gix_smart_core::bridge::{MessageReader, RequestBody};
use gix_smart_core::capabilities::{Capability, CapabilitySet};
use gix_smart_core::decode::{Decoder, Expect};
use gix_smart_core::discovery::read_advertisement;
use gix_smart_core::encode::Encoder;
use gix_smart_core::endpoint::{request_headers, Endpoint, Purpose};
use gix_smart_core::error::{Error, Result};
use gix_smart_core::http::HttpClient;
use gix_smart_core::message::{Command, Message, Ref, RefStatus, ReportStatus, UpdateRequest};
use gix_smart_core::store::Store;
use gix_smart_core::Service;

/// Configuration of a push.
#[derive(Debug, Clone)]
pub struct Options {
    /// The capabilities the client offers; must carry an `agent` entry.
    pub capabilities: CapabilitySet,
    /// How the outgoing pack is generated.
    pub pack: PackConfig,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            capabilities: CapabilitySet::client_defaults(concat!(
                "git/gix-send-pack-",
                env!("CARGO_PKG_VERSION")
            )),
            pack: PackConfig::default(),
        }
    }
}

/// The server-reported outcome for one pushed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    /// The command that was sent.
    pub command: Command,
    /// The per-ref status the server reported for it.
    pub status: RefStatus,
}

/// Push ref updates to `endpoint`.
///
/// `select` computes the commands from the advertised refs (and may consult
/// the store); returning no commands succeeds immediately without a POST.
/// Otherwise the update-request and the pack produced by `packer` are sent
/// in a single body, and the server's report-status decides the outcome: an
/// unpack failure fails the push as a whole, while per-ref rejections are
/// returned alongside their commands.
pub fn push<H, S, P, F>(
    http: &mut H,
    store: &mut S,
    endpoint: &Endpoint,
    options: &Options,
    select: F,
    packer: &mut P,
) -> Result<Vec<CommandOutcome>>
where
    H: HttpClient,
    S: Store,
    P: PackGenerator<S> + ?Sized,
    F: FnOnce(&S, &[Ref]) -> Vec<Command>,
{
    let mut decoder = Decoder::new();
    let advertisement = read_advertisement(
        http,
        endpoint,
        &options.capabilities,
        Service::ReceivePack,
        &mut decoder,
    )?;
    let common = options.capabilities.intersect(&advertisement.capabilities);
    let side_band = common.side_band_mode();
    let report_status = advertisement.capabilities.contains(&Capability::ReportStatus);

    let commands = select(&*store, &advertisement.refs);
    if commands.is_empty() {
        tracing::debug!("no commands to send, push complete");
        return Ok(Vec::new());
    }
    tracing::debug!(commands = commands.len(), ?side_band, report_status, "starting push");

    // Request report-status whenever the server offers it.
    let mut request_capabilities = common.negotiated();
    if report_status && !request_capabilities.contains(&Capability::ReportStatus) {
        request_capabilities.push(Capability::ReportStatus);
    }

    let pack = packer
        .generate(&options.pack, &*store, &advertisement.refs, &commands)
        .map_err(Error::Store)?;
    let request = UpdateRequest {
        shallow: advertisement.shallow.clone(),
        commands: commands.clone(),
        capabilities: request_capabilities,
    };

    let headers = request_headers(endpoint, &options.capabilities, Purpose::Request(Service::ReceivePack))?;
    let url = endpoint.service_url(Service::ReceivePack);
    let encoder = Encoder::update_request(&request);
    let mut body = RequestBody::with_trailer(encoder, pack);
    let mut response = http.post(&url, &headers, &mut body)?;

    if !report_status {
        // Without report-status there is nothing to read back; assume the
        // server applied what it accepted.
        return Ok(commands
            .into_iter()
            .map(|command| CommandOutcome {
                command,
                status: RefStatus::Ok,
            })
            .collect());
    }

    let refs: Vec<BString> = commands.iter().map(|command| command.name().clone()).collect();
    decoder.expect(Expect::ReportStatus {
        refs,
        mode: side_band,
    });
    let mut reader = MessageReader::new(&mut decoder, &mut response);
    let report = reader.expect_message("a status report", |message| match message {
        Message::ReportStatus(report) => Some(report),
        _ => None,
    })?;
    outcomes(commands, report)
}

/// Pair each sent command with its reported status.
fn outcomes(commands: Vec<Command>, report: ReportStatus) -> Result<Vec<CommandOutcome>> {
    if let Err(message) = report.unpack {
        return Err(Error::Sync(message));
    }
    commands
        .into_iter()
        .map(|command| match report.status_of(command.name()) {
            Some(status) => Ok(CommandOutcome {
                command,
                status: status.clone(),
            }),
            None => Err(Error::sync(format!(
                "server reported no status for {}",
                command.name().as_bstr()
            ))),
        })
        .collect()
}
