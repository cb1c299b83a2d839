use std::time::Instant;

use async_trait::async_trait;
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use reqwest::Method;
use tracing::{instrument, trace};

use super::utils::reqwest_to_transport_error;
use super::{AsyncProbeSender, HttpSender};
use crate::error::BlindTimingError;
use crate::requests::{ProbeRequest, RenderedProbe};
use crate::std_ext::named::Named;
use crate::std_ext::time::duration_to_seconds;

/// concrete implementation of an [`AsyncProbeSender`] using an underlying [`reqwest::Client`]
///
/// the elapsed time covers sending the request and reading the whole response body
#[derive(Clone, Debug)]
pub struct AsyncSender {
    client: reqwest::Client,
    request: ProbeRequest,
}

impl HttpSender for AsyncSender {
    type ClientType = reqwest::Client;

    /// create a new sender, using [`reqwest::Client`] as the base
    ///
    /// # Examples
    ///
    /// ```
    /// # use std::time::Duration;
    /// use blindtiming::requests::{PayloadTemplate, ProbeRequest};
    /// use blindtiming::senders::{AsyncSender, HttpSender};
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let template = PayloadTemplate::new("{orig}|sleep {sleep}")?;
    /// let request = ProbeRequest::from_url("http://localhost/?cmd=ls", "cmd", template)?;
    ///
    /// let client = reqwest::Client::builder().user_agent("blindtiming").build()?;
    ///
    /// let sender = AsyncSender::with_client(client, request);
    /// # Ok(())
    /// # }
    /// ```
    fn with_client(client: Self::ClientType, request: ProbeRequest) -> Self {
        Self { client, request }
    }
}

impl AsyncSender {
    /// create a new `AsyncSender` with a default [`reqwest::Client`]
    #[must_use]
    pub fn new(request: ProbeRequest) -> Self {
        Self::with_client(reqwest::Client::default(), request)
    }

    /// the request probes are rendered from
    #[must_use]
    pub const fn request(&self) -> &ProbeRequest {
        &self.request
    }

    fn build_request(rendered: RenderedProbe) -> reqwest::Request {
        let method = if rendered.body.is_some() {
            Method::POST
        } else {
            Method::GET
        };

        let mut request = reqwest::Request::new(method, rendered.url);

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

impl Named for AsyncSender {
    fn name(&self) -> &str {
        "AsyncSender"
    }
}

#[async_trait]
impl AsyncProbeSender for AsyncSender {
    #[instrument(skip_all, level = "trace")]
    async fn send(&mut self, requested_delay: f64) -> Result<f64, BlindTimingError> {
        let rendered = self.request.render(requested_delay)?;

        let request = Self::build_request(rendered);

        let now = Instant::now();

        let response = self
            .client
            .execute(request)
            .await
            .map_err(reqwest_to_transport_error)?;

        let status = response.status();

        response.bytes().await.map_err(reqwest_to_transport_error)?;

        let elapsed = duration_to_seconds(now.elapsed());

        trace!(sender = self.name(), requested_delay, elapsed, %status, "probe sent");

        Ok(elapsed)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use httpmock::prelude::*;

    use super::*;
    use crate::budget::Budget;
    use crate::oracle::TimingOracle;
    use crate::requests::PayloadTemplate;
    use crate::sequencers::GeometricSequencer;

    /// the async sender times the mocked delay
    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn async_sender_measures_delay() {
        let server = MockServer::start_async().await;
        let mocked = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/search")
                    .query_param("q", "x' and sleep(0.15) -- ");
                then.status(200).delay(Duration::from_millis(150));
            })
            .await;

        let template = PayloadTemplate::new("{orig}' and sleep({sleep}) -- ").unwrap();
        let request = ProbeRequest::from_url(&server.url("/search?q=x"), "q", template).unwrap();

        let elapsed = AsyncSender::new(request).send(0.15).await.unwrap();

        assert_eq!(mocked.hits_async().await, 1);
        assert!(elapsed >= 0.15);
    }

    /// an unset sender is a configuration error, not a skipped probe
    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn uninitialized_sender_is_a_configuration_error() {
        let oracle = TimingOracle::builder().build().unwrap();
        let mut sender: Option<AsyncSender> = None;

        let error = oracle.verify_async(&mut sender).await.unwrap_err();

        assert!(matches!(error, BlindTimingError::SenderNotInitialized { .. }));
    }

    /// end to end over the async driver with doubling delays
    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn async_oracle_confirms_sleeping_target() {
        let server = MockServer::start_async().await;

        for (payload, millis) in [("1;sleep 0.1;", 100_u64), ("1;sleep 0.2;", 200)] {
            server
                .mock_async(|when, then| {
                    when.method(GET).path("/ping").query_param("host", payload);
                    then.status(200).delay(Duration::from_millis(millis));
                })
                .await;
        }

        let template = PayloadTemplate::new("{orig};sleep {sleep};").unwrap();
        let request = ProbeRequest::from_url(&server.url("/ping?host=1"), "host", template).unwrap();
        let mut sender = AsyncSender::new(request);

        let oracle = TimingOracle::builder()
            .sequencer(GeometricSequencer::doubling(0.1).unwrap())
            .budget(Budget::new(3, 5.0).unwrap())
            .build()
            .unwrap();

        let verdict = oracle.verify_async(&mut sender).await.unwrap();

        assert!(verdict.is_confirmed());
        assert_eq!(verdict.probes_sent(), 2);
    }
}
