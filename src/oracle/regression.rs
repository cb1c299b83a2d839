//! online simple linear regression of observed latency on requested delay
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::{error, trace};

use crate::error::BlindTimingError;

/// default allowed deviation of the correlation coefficient from a perfect `1.0`
pub const DEFAULT_CORRELATION_ERROR_RANGE: f64 = 0.15;

/// default allowed deviation of the fitted slope from a perfect `1.0`
pub const DEFAULT_SLOPE_ERROR_RANGE: f64 = 0.30;

/// running sums for a least-squares fit of `y = slope * x + intercept`
///
/// points are added one at a time; nothing but the sums is stored
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub(crate) struct OnlineRegression {
    count: f64,
    sum_x: f64,
    sum_y: f64,
    sum_xx: f64,
    sum_yy: f64,
    sum_xy: f64,
}

impl OnlineRegression {
    pub(crate) const fn new() -> Self {
        Self {
            count: 0.0,
            sum_x: 0.0,
            sum_y: 0.0,
            sum_xx: 0.0,
            sum_yy: 0.0,
            sum_xy: 0.0,
        }
    }

    pub(crate) fn add(&mut self, x: f64, y: f64) {
        self.count += 1.0;
        self.sum_x += x;
        self.sum_y += y;
        self.sum_xx += x * x;
        self.sum_yy += y * y;
        self.sum_xy += x * y;
    }

    pub(crate) fn reset(&mut self) {
        *self = Self::new();
    }

    // n * var(x), n * var(y), n * cov(x, y); all scaled by n
    fn moments(&self) -> (f64, f64, f64) {
        let sxx = self.count.mul_add(self.sum_xx, -(self.sum_x * self.sum_x));
        let syy = self.count.mul_add(self.sum_yy, -(self.sum_y * self.sum_y));
        let sxy = self.count.mul_add(self.sum_xy, -(self.sum_x * self.sum_y));
        (sxx, syy, sxy)
    }

    /// fitted slope; `None` with fewer than two distinct x values
    pub(crate) fn slope(&self) -> Option<f64> {
        let (sxx, _, sxy) = self.moments();

        if self.count < 2.0 || sxx <= f64::EPSILON {
            return None;
        }

        Some(sxy / sxx)
    }

    /// pearson correlation coefficient; `None` if either variable is constant
    pub(crate) fn correlation(&self) -> Option<f64> {
        let (sxx, syy, sxy) = self.moments();

        if self.count < 2.0 || sxx <= f64::EPSILON || syy <= f64::EPSILON {
            return None;
        }

        Some(sxy / (sxx * syy).sqrt())
    }
}

/// stricter confirmation rule: the streak's observed latencies must fit a line of
/// slope ~1 against the requested delays
///
/// a target that sleeps for `d` seconds adds exactly `d` seconds to its response
/// time, so a slope far from one points at something other than the payload
/// (proportional throttling, retries, queueing)
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RegressionCheck {
    correlation_error_range: f64,
    slope_error_range: f64,
}

impl RegressionCheck {
    /// create a new `RegressionCheck`
    ///
    /// # Errors
    ///
    /// both ranges must be finite and fall within `(0, 1]`
    pub fn new(correlation_error_range: f64, slope_error_range: f64) -> Result<Self, BlindTimingError> {
        for (name, range) in [
            ("correlation_error_range", correlation_error_range),
            ("slope_error_range", slope_error_range),
        ] {
            if !range.is_finite() || range <= 0.0 || range > 1.0 {
                error!(name, range, "regression error ranges must be in (0, 1]");

                return Err(BlindTimingError::InvalidParameter {
                    param: format!("{name}={range}"),
                    message: "regression error ranges must be in (0, 1]",
                });
            }
        }

        Ok(Self {
            correlation_error_range,
            slope_error_range,
        })
    }

    /// allowed deviation of the correlation coefficient from 1
    #[must_use]
    pub const fn correlation_error_range(&self) -> f64 {
        self.correlation_error_range
    }

    /// allowed deviation of the slope from 1
    #[must_use]
    pub const fn slope_error_range(&self) -> f64 {
        self.slope_error_range
    }

    pub(crate) fn accepts(&self, regression: &OnlineRegression) -> bool {
        let (Some(correlation), Some(slope)) = (regression.correlation(), regression.slope()) else {
            trace!("not enough distinct points for a regression fit");
            return false;
        };

        let accepted = correlation > 1.0 - self.correlation_error_range
            && (slope - 1.0).abs() < self.slope_error_range;

        trace!(correlation, slope, accepted, "regression check");

        accepted
    }
}

impl Default for RegressionCheck {
    fn default() -> Self {
        Self {
            correlation_error_range: DEFAULT_CORRELATION_ERROR_RANGE,
            slope_error_range: DEFAULT_SLOPE_ERROR_RANGE,
        }
    }
}
