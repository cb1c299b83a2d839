use std::time::Duration;

/// render a number of seconds the way database and shell sleep functions expect it
///
/// whole numbers are printed without a fractional part (`5`, not `5.0`), everything else
/// keeps up to three decimal places with trailing zeros removed (`0.3`, `1.25`)
#[must_use]
pub fn format_seconds(seconds: f64) -> String {
    if seconds.fract() == 0.0 && seconds.abs() < 1e15 {
        #[allow(clippy::cast_possible_truncation)]
        return format!("{}", seconds as i64);
    }

    let rendered = format!("{seconds:.3}");
    rendered
        .trim_end_matches('0')
        .trim_end_matches('.')
        .to_string()
}

/// number of whole milliseconds in the given number of seconds, rounded to nearest
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn seconds_to_millis(seconds: f64) -> u64 {
    (seconds.max(0.0) * 1000.0).round() as u64
}

/// convert a [`Duration`] into the fractional seconds used throughout the oracle
#[must_use]
#[inline]
pub fn duration_to_seconds(duration: Duration) -> f64 {
    duration.as_secs_f64()
}
