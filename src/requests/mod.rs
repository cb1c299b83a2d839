//! [`ProbeRequest`]s describe where a payload is injected; [`PayloadTemplate`]s describe
//! what the payload looks like for a given delay
mod probe_request;
mod template;

pub use self::probe_request::{ParameterLocation, ProbeRequest, RenderedProbe, DEFAULT_TIMEOUT_SLACK};
pub use self::template::{
    PayloadTemplate, ORIGINAL_VALUE_TOKEN, SLEEP_HMS_TOKEN, SLEEP_MILLIS_TOKEN, SLEEP_SECONDS_TOKEN,
};
