use std::fmt::{self, Display};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::{error, instrument};

use crate::error::BlindTimingError;
use crate::std_ext::time::{format_seconds, seconds_to_millis};

/// replaced with the parameter's original value
pub const ORIGINAL_VALUE_TOKEN: &str = "{orig}";

/// replaced with the requested delay in seconds, e.g. `5` or `7.5`
pub const SLEEP_SECONDS_TOKEN: &str = "{sleep}";

/// replaced with the requested delay in whole milliseconds, e.g. `5000`
pub const SLEEP_MILLIS_TOKEN: &str = "{sleep_ms}";

/// replaced with the requested delay as `h:m:s`, e.g. `0:0:5`
pub const SLEEP_HMS_TOKEN: &str = "{sleep_hms}";

const SLEEP_TOKENS: [&str; 3] = [SLEEP_SECONDS_TOKEN, SLEEP_MILLIS_TOKEN, SLEEP_HMS_TOKEN];

/// an injection payload with placeholders for the original value and the delay
///
/// # Examples
///
/// ```
/// use blindtiming::requests::PayloadTemplate;
///
/// let template = PayloadTemplate::new("{orig}' and 0 in (select sleep({sleep}) ) -- ")?;
///
/// assert_eq!(
///     template.render("42", 5.0)?,
///     "42' and 0 in (select sleep(5) ) -- "
/// );
/// # Ok::<(), blindtiming::error::BlindTimingError>(())
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PayloadTemplate {
    template: String,
}

impl PayloadTemplate {
    /// create a new `PayloadTemplate`
    ///
    /// # Errors
    ///
    /// the template must contain at least one of the sleep tokens; a payload that
    /// can't be parameterized by the delay is useless to the oracle
    pub fn new(template: impl Into<String>) -> Result<Self, BlindTimingError> {
        let template = template.into();

        if !SLEEP_TOKENS.iter().any(|token| template.contains(token)) {
            error!(%template, "payload template has no sleep token");

            return Err(BlindTimingError::InvalidParameter {
                param: template,
                message: "payload templates need a {sleep}, {sleep_ms}, or {sleep_hms} token",
            });
        }

        Ok(Self { template })
    }

    // built-in payloads; each one is checked against `new` in the dialect tests
    pub(crate) fn from_static(template: &'static str) -> Self {
        Self {
            template: template.to_string(),
        }
    }

    /// the raw template
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.template
    }

    /// substitute `original` and `delay` into the template
    ///
    /// # Errors
    ///
    /// fails with [`BlindTimingError::PayloadRender`] if `delay` isn't a finite,
    /// non-negative number of seconds
    #[instrument(skip(self), level = "trace")]
    pub fn render(&self, original: &str, delay: f64) -> Result<String, BlindTimingError> {
        if !delay.is_finite() || delay < 0.0 {
            error!(template = %self.template, delay, "can't render a payload for this delay");

            return Err(BlindTimingError::PayloadRender {
                template: self.template.clone(),
                reason: "delay must be a finite, non-negative number of seconds",
            });
        }

        Ok(self
            .template
            .replace(SLEEP_HMS_TOKEN, &hours_minutes_seconds(delay))
            .replace(SLEEP_MILLIS_TOKEN, &seconds_to_millis(delay).to_string())
            .replace(SLEEP_SECONDS_TOKEN, &format_seconds(delay))
            .replace(ORIGINAL_VALUE_TOKEN, original))
    }
}

impl Display for PayloadTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.template)
    }
}

// t-sql's WAITFOR DELAY wants hh:mm:ss
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn hours_minutes_seconds(delay: f64) -> String {
    let whole = delay.trunc() as u64;
    let hours = whole / 3600;
    let minutes = (whole % 3600) / 60;
    let seconds = delay - (hours * 3600 + minutes * 60) as f64;

    format!("{hours}:{minutes}:{}", format_seconds(seconds))
}
