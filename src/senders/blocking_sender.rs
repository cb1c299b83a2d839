use std::time::Instant;

use reqwest::header::{HeaderValue, CONTENT_TYPE};
use reqwest::Method;
use tracing::{instrument, trace};

use super::utils::reqwest_to_transport_error;
use super::{HttpSender, ProbeSender};
use crate::error::BlindTimingError;
use crate::requests::{ProbeRequest, RenderedProbe};
use crate::std_ext::named::Named;
use crate::std_ext::time::duration_to_seconds;

/// concrete implementation of a [`ProbeSender`] using an underlying [`reqwest::blocking::Client`]
///
/// the elapsed time covers sending the request and reading the whole response body
#[derive(Clone, Debug)]
pub struct BlockingSender {
    client: reqwest::blocking::Client,
    request: ProbeRequest,
}

impl HttpSender for BlockingSender {
    type ClientType = reqwest::blocking::Client;

    fn with_client(client: Self::ClientType, request: ProbeRequest) -> Self {
        Self { client, request }
    }
}

impl BlockingSender {
    /// create a new `BlockingSender` with a default [`reqwest::blocking::Client`]
    #[must_use]
    pub fn new(request: ProbeRequest) -> Self {
        Self::with_client(reqwest::blocking::Client::default(), request)
    }

    /// the request probes are rendered from
    #[must_use]
    pub const fn request(&self) -> &ProbeRequest {
        &self.request
    }

    // note to self: same as the async sender's build_request; the request types differ
    fn build_request(rendered: RenderedProbe) -> reqwest::blocking::Request {
        let method = if rendered.body.is_some() {
            Method::POST
        } else {
            Method::GET
        };

        let mut request = reqwest::blocking::Request::new(method, rendered.url);

        *request.timeout_mut() = Some(rendered.timeout);

        if let Some(body) = rendered.body {
            request.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("application/x-www-form-urlencoded"),
            );
            *request.body_mut() = Some(body.into());
        }

        request
    }
}

impl Named for BlockingSender {
    fn name(&self) -> &str {
        "BlockingSender"
    }
}

impl ProbeSender for BlockingSender {
    /// render the payload for `requested_delay`, send it, and time the round trip
    ///
    /// # Examples
    ///
    /// ```
    /// # use std::time::Duration;
    /// use blindtiming::prelude::*;
    /// use blindtiming::senders::BlockingSender;
    /// use httpmock::prelude::*;
    /// # fn main() -> Result<(), BlindTimingError> {
    /// let server = MockServer::start();
    /// let mocked = server.mock(|when, then| {
    ///     when.method(GET)
    ///         .path("/doctest")
    ///         .query_param("id", "1 and sleep(0.1)");
    ///     then.status(200).delay(Duration::from_millis(100));
    /// });
    ///
    /// let template = PayloadTemplate::new("{orig} and sleep({sleep})")?;
    /// let request = ProbeRequest::from_url(&server.url("/doctest?id=1"), "id", template)?;
    ///
    /// let mut sender = BlockingSender::new(request);
    ///
    /// let elapsed = sender.send(0.1)?;
    ///
    /// assert_eq!(mocked.hits(), 1);
    /// assert!(elapsed >= 0.1);
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// transport failures are reported as [`BlindTimingError::Transport`]; a payload that
    /// can't be rendered as [`BlindTimingError::PayloadRender`]
    #[instrument(skip_all, level = "trace")]
    fn send(&mut self, requested_delay: f64) -> Result<f64, BlindTimingError> {
        let rendered = self.request.render(requested_delay)?;

        let request = Self::build_request(rendered);

        let now = Instant::now();

        let response = self
            .client
            .execute(request)
            .map_err(reqwest_to_transport_error)?;

        let status = response.status();

        // the target may stall mid-body, so the clock keeps running until it's read
        response.bytes().map_err(reqwest_to_transport_error)?;

        let elapsed = duration_to_seconds(now.elapsed());

        trace!(sender = self.name(), requested_delay, elapsed, %status, "probe sent");

        Ok(elapsed)
    }
}
