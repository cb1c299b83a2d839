use tracing::{instrument, warn};

use crate::error::{BlindTimingError, TransportErrorKind};

/// internal helper to convert [`reqwest::Error`] to [`BlindTimingError::Transport`]
#[allow(clippy::needless_pass_by_value)]
#[instrument(skip_all, level = "trace")]
pub(super) fn reqwest_to_transport_error(source: reqwest::Error) -> BlindTimingError {
    let status = source.status().map(|status_code| status_code.as_u16());

    let kind = if source.is_body() {
        // related to the request or response body
        TransportErrorKind::Body(status)
    } else if source.is_connect() {
        // connect is more specific than request and both can be true at the same time;
        // keep it ahead of the request check
        TransportErrorKind::Connect(status)
    } else if source.is_decode() {
        TransportErrorKind::Decode(status)
    } else if source.is_redirect() {
        TransportErrorKind::Redirect(status)
    } else if source.is_timeout() {
        // same as connect, more specific than request
        TransportErrorKind::Timeout(status)
    } else if source.is_request() {
        TransportErrorKind::Request(status)
    } else {
        TransportErrorKind::Unknown
    };

    warn!(?kind, "error occurred while sending probe: {}", source);

    BlindTimingError::transport(kind, source.to_string())
}
