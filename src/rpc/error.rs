use alloy::rpc::types::Log;
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;

/// Failure of an outbound RPC call, after classification.
#[derive(Debug, Error)]
pub enum RpcError {
    /// Raw provider or transport failure. The text is kept verbatim so range
    /// handling can inspect it.
    #[error("RPC error: {0}")]
    Transport(String),

    #[error("RPC call timed out after {0:?}")]
    Timeout(Duration),

    /// Quota or capacity of the endpoint is used up. Never retried.
    #[error("RPC capacity exceeded: {0}")]
    CapacityExceeded(String),

    #[error("{method} exhausted retries after {attempts} attempts: {last}")]
    RetriesExhausted {
        method: &'static str,
        attempts: usize,
        last: String,
    },

    /// A split `eth_getLogs` query where at least one sub-range failed.
    /// Logs from the sub-ranges that succeeded are kept.
    #[error(
        "{} split eth_getLogs sub-range(s) failed ({}); {} log(s) recovered",
        .failures.len(),
        join_errors(.failures),
        .logs.len()
    )]
    PartialRange {
        logs: Vec<Log>,
        failures: Vec<RpcError>,
    },

    #[error("Malformed RPC response: {0}")]
    Decode(String),
}

fn join_errors(errors: &[RpcError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// What the provider's error text tells us about how to react.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Throttled,
    CapacityExceeded,
    /// The queried block range is too large. Carries the provider's suggested
    /// sub-range when the message embeds one.
    RangeExceeded(Option<(u64, u64)>),
    Other,
}

const THROTTLE_MARKERS: &[&str] = &["429", "too many requests", "throttl", "rate limited"];

const RANGE_MARKERS: &[&str] = &[
    "block range",
    "range is too large",
    "range too large",
    "range too wide",
    "query returned more than",
    "exceeds max results",
    "too many results",
    "response size exceeded",
    "response size should not",
];

pub fn classify(message: &str) -> ErrorClass {
    let lowered = message.to_lowercase();

    if THROTTLE_MARKERS.iter().any(|marker| lowered.contains(marker)) {
        return ErrorClass::Throttled;
    }
    if lowered.contains("limit exceeded") {
        return ErrorClass::CapacityExceeded;
    }
    if RANGE_MARKERS.iter().any(|marker| lowered.contains(marker)) {
        return ErrorClass::RangeExceeded(parse_suggested_range(message));
    }
    ErrorClass::Other
}

static HEX_PAIR: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\[\s*0x([0-9a-fA-F]+)\s*,\s*0x([0-9a-fA-F]+)\s*\]").ok());

static DECIMAL_PAIR: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"retry with the range (\d+)-(\d+)").ok());

/// Extracts a `[0xstart, 0xend]` pair, or the decimal `retry with the range
/// start-end` form some providers use.
pub fn parse_suggested_range(message: &str) -> Option<(u64, u64)> {
    if let Some(captures) = HEX_PAIR.as_ref()?.captures(message) {
        let start = u64::from_str_radix(captures.get(1)?.as_str(), 16).ok()?;
        let end = u64::from_str_radix(captures.get(2)?.as_str(), 16).ok()?;
        return (start <= end).then_some((start, end));
    }

    let captures = DECIMAL_PAIR.as_ref()?.captures(message)?;
    let start = captures.get(1)?.as_str().parse().ok()?;
    let end = captures.get(2)?.as_str().parse().ok()?;
    (start <= end).then_some((start, end))
}

impl RpcError {
    pub fn class(&self) -> ErrorClass {
        match self {
            RpcError::Transport(message) => classify(message),
            RpcError::CapacityExceeded(_) => ErrorClass::CapacityExceeded,
            _ => ErrorClass::Other,
        }
    }

    /// Throttling and timeouts are retried in place.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RpcError::Timeout(_)) || self.class() == ErrorClass::Throttled
    }

    /// Errors that must abort the surrounding batch and job.
    pub fn is_fatal(&self) -> bool {
        match self {
            RpcError::PartialRange { failures, .. } => failures.iter().any(RpcError::is_fatal),
            other => other.class() == ErrorClass::CapacityExceeded,
        }
    }
}

impl From<alloy::transports::TransportError> for RpcError {
    fn from(error: alloy::transports::TransportError) -> Self {
        RpcError::Transport(error.to_string())
    }
}
