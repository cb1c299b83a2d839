use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::{error, instrument};
use url::form_urlencoded;
use url::Url;

use super::PayloadTemplate;
use crate::error::BlindTimingError;

/// default time a probe may take beyond its requested delay before the transport gives up
pub const DEFAULT_TIMEOUT_SLACK: Duration = Duration::from_secs(10);

/// where the injected parameter travels
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ParameterLocation {
    /// `GET` request, parameter in the url's query string
    #[default]
    Query,

    /// `POST` request, parameter in an `application/x-www-form-urlencoded` body
    Form,
}

/// the wire-level pieces of one rendered probe
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderedProbe {
    /// the url to request
    pub url: Url,

    /// urlencoded form body, if the parameter travels in the body
    pub body: Option<String>,

    /// transport timeout for this probe
    pub timeout: Duration,
}

/// a request template that injects a [`PayloadTemplate`] into a single parameter
///
/// every other parameter is left as it was; the injected parameter's original value is
/// available to the template as `{orig}`
///
/// # Examples
///
/// ```
/// use blindtiming::requests::{PayloadTemplate, ProbeRequest};
///
/// let template = PayloadTemplate::new("{orig};sleep {sleep};")?;
/// let request = ProbeRequest::from_url("http://localhost/ping?host=example.com&v=1", "host", template)?;
///
/// let rendered = request.render(5.0)?;
///
/// assert_eq!(
///     rendered.url.as_str(),
///     "http://localhost/ping?host=example.com%3Bsleep+5%3B&v=1"
/// );
/// # Ok::<(), blindtiming::error::BlindTimingError>(())
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ProbeRequest {
    url: Url,
    parameter: String,
    location: ParameterLocation,
    fields: Vec<(String, String)>,
    template: PayloadTemplate,
    timeout_slack: Duration,
}

impl ProbeRequest {
    /// inject into the query parameter `parameter` of `url`
    ///
    /// # Errors
    ///
    /// fails with [`BlindTimingError::InvalidUrl`] if `url` can't be parsed
    #[instrument(skip(template), level = "trace")]
    pub fn from_url(
        url: &str,
        parameter: &str,
        template: PayloadTemplate,
    ) -> Result<Self, BlindTimingError> {
        let parsed = parse_url(url)?;

        let fields = parsed
            .query_pairs()
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();

        Ok(Self {
            url: parsed,
            parameter: parameter.to_string(),
            location: ParameterLocation::Query,
            fields,
            template,
            timeout_slack: DEFAULT_TIMEOUT_SLACK,
        })
    }

    /// inject into the form field `parameter` of a `POST` to `url`
    ///
    /// `fields` are the form's original fields, in order
    ///
    /// # Errors
    ///
    /// fails with [`BlindTimingError::InvalidUrl`] if `url` can't be parsed
    #[instrument(skip(fields, template), level = "trace")]
    pub fn from_form<K, V>(
        url: &str,
        fields: impl IntoIterator<Item = (K, V)>,
        parameter: &str,
        template: PayloadTemplate,
    ) -> Result<Self, BlindTimingError>
    where
        K: Into<String>,
        V: Into<String>,
    {
        Ok(Self {
            url: parse_url(url)?,
            parameter: parameter.to_string(),
            location: ParameterLocation::Form,
            fields: fields
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
            template,
            timeout_slack: DEFAULT_TIMEOUT_SLACK,
        })
    }

    /// builder-style setter for the time allowed beyond the requested delay
    #[must_use]
    pub fn timeout_slack(mut self, slack: Duration) -> Self {
        self.timeout_slack = slack;
        self
    }

    /// the injected parameter's name
    #[must_use]
    pub fn parameter(&self) -> &str {
        &self.parameter
    }

    /// where the injected parameter travels
    #[must_use]
    pub const fn location(&self) -> ParameterLocation {
        self.location
    }

    /// the payload template
    #[must_use]
    pub const fn template(&self) -> &PayloadTemplate {
        &self.template
    }

    /// the parameter's value before injection; empty if the parameter wasn't present
    #[must_use]
    pub fn original_value(&self) -> &str {
        self.fields
            .iter()
            .find(|(key, _)| *key == self.parameter)
            .map_or("", |(_, value)| value.as_str())
    }

    /// build the url/body pair that requests `delay` seconds of sleep
    ///
    /// # Errors
    ///
    /// fails with [`BlindTimingError::PayloadRender`] if the payload can't be rendered
    #[instrument(skip(self), level = "trace")]
    pub fn render(&self, delay: f64) -> Result<RenderedProbe, BlindTimingError> {
        let payload = self.template.render(self.original_value(), delay)?;

        let mut injected = false;

        let mut fields: Vec<(&str, &str)> = self
            .fields
            .iter()
            .map(|(key, value)| {
                if !injected && *key == self.parameter {
                    injected = true;
                    (key.as_str(), payload.as_str())
                } else {
                    (key.as_str(), value.as_str())
                }
            })
            .collect();

        if !injected {
            fields.push((self.parameter.as_str(), payload.as_str()));
        }

        let timeout = self.timeout_slack + Duration::from_secs_f64(delay);

        match self.location {
            ParameterLocation::Query => {
                let mut url = self.url.clone();
                url.query_pairs_mut().clear().extend_pairs(fields);

                Ok(RenderedProbe {
                    url,
                    body: None,
                    timeout,
                })
            }
            ParameterLocation::Form => {
                let body = form_urlencoded::Serializer::new(String::new())
                    .extend_pairs(fields)
                    .finish();

                Ok(RenderedProbe {
                    url: self.url.clone(),
                    body: Some(body),
                    timeout,
                })
            }
        }
    }
}

fn parse_url(url: &str) -> Result<Url, BlindTimingError> {
    Url::parse(url).map_err(|source| {
        error!(%url, "Failed to parse URL: {}", source);

        BlindTimingError::InvalidUrl {
            source,
            url: url.to_string(),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sleep_template() -> PayloadTemplate {
        PayloadTemplate::new("{orig} and sleep({sleep})").unwrap()
    }

    /// the target parameter is replaced, the rest are kept in order
    #[test]
    fn query_parameter_is_injected_in_place() {
        let request =
            ProbeRequest::from_url("http://localhost/item?a=1&id=7&b=2", "id", sleep_template())
                .unwrap();

        assert_eq!(request.original_value(), "7");

        let rendered = request.render(2.0).unwrap();
        let pairs: Vec<_> = rendered.url.query_pairs().into_owned().collect();

        assert_eq!(
            pairs,
            vec![
                (String::from("a"), String::from("1")),
                (String::from("id"), String::from("7 and sleep(2)")),
                (String::from("b"), String::from("2")),
            ]
        );
        assert!(rendered.body.is_none());
        assert_eq!(rendered.timeout, DEFAULT_TIMEOUT_SLACK + Duration::from_secs(2));
    }

    /// a parameter that isn't present yet is appended with an empty original value
    #[test]
    fn missing_parameter_is_appended() {
        let request =
            ProbeRequest::from_url("http://localhost/item", "id", sleep_template()).unwrap();

        assert_eq!(request.original_value(), "");

        let rendered = request.render(1.0).unwrap();
        assert_eq!(rendered.url.query(), Some("id=+and+sleep%281%29"));
    }

    /// form probes carry the payload in an urlencoded body
    #[test]
    fn form_parameter_is_injected_into_body() {
        let request = ProbeRequest::from_form(
            "http://localhost/login",
            [("user", "admin"), ("pass", "hunter2")],
            "user",
            sleep_template(),
        )
        .unwrap()
        .timeout_slack(Duration::from_secs(1));

        let rendered = request.render(3.0).unwrap();

        assert_eq!(rendered.url.as_str(), "http://localhost/login");
        assert_eq!(
            rendered.body.as_deref(),
            Some("user=admin+and+sleep%283%29&pass=hunter2")
        );
        assert_eq!(rendered.timeout, Duration::from_secs(4));
        assert_eq!(request.location(), ParameterLocation::Form);
    }

    /// unparseable urls are reported as such
    #[test]
    fn invalid_url_is_rejected() {
        let error = ProbeRequest::from_url("not a url", "id", sleep_template()).unwrap_err();
        assert!(matches!(error, BlindTimingError::InvalidUrl { .. }));
    }
}
