//! Scheduling of CA directed enrollment retries.
//!
//! The CA answers an enrollment with `202 Accepted` and a `Retry-After` header when it is not
//! ready to issue yet. [`decide`] turns that directive into what the client should do next; it
//! performs no I/O itself.

use std::{fmt, time::Duration};

use time::OffsetDateTime;

/// Longest wait the client accepts for an absolute retry time.
pub const MAX_RETRY_WAIT: Duration = Duration::from_secs(120);

/// Normalized retry directive from a CA.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDirective {
    /// Retry after this many seconds.
    After(u64),

    /// Retry no earlier than this time.
    At(OffsetDateTime),

    /// Neither a delay nor a time was given.
    Invalid,
}

impl RetryDirective {
    /// Builds a directive from a relative delay and an absolute unix time, where zero means
    /// "not set" for both.
    ///
    /// A nonzero delay wins over the absolute time.
    pub fn new(delay_secs: u64, retry_at: i64) -> Self {
        if delay_secs > 0 {
            return RetryDirective::After(delay_secs);
        }

        if retry_at == 0 {
            return RetryDirective::Invalid;
        }

        OffsetDateTime::from_unix_timestamp(retry_at)
            .map(RetryDirective::At)
            .unwrap_or(RetryDirective::Invalid)
    }
}

/// Why a retry will not be attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAbort {
    /// The retry window opens further away than [`MAX_RETRY_WAIT`].
    TooFarInFuture(OffsetDateTime),

    /// The directive carried no usable delay or time.
    InvalidDirective,
}

impl fmt::Display for RetryAbort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryAbort::TooFarInFuture(at) => write!(
                f,
                "retry window too far in the future, retry at {} (unix time {})",
                at,
                at.unix_timestamp()
            ),
            RetryAbort::InvalidDirective => f.write_str("invalid retry directive"),
        }
    }
}

/// What the client should do with a retry directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    ProceedImmediately,
    WaitThen(Duration),
    Abort(RetryAbort),
}

/// Decides how to act on `directive` at time `now`.
pub fn decide(directive: &RetryDirective, now: OffsetDateTime) -> RetryDecision {
    match *directive {
        RetryDirective::After(0) | RetryDirective::Invalid => {
            RetryDecision::Abort(RetryAbort::InvalidDirective)
        }

        RetryDirective::After(secs) => RetryDecision::WaitThen(Duration::from_secs(secs)),

        RetryDirective::At(at) => {
            let wait = (at - now).whole_seconds();

            if wait <= 0 {
                RetryDecision::ProceedImmediately
            } else if wait as u64 <= MAX_RETRY_WAIT.as_secs() {
                RetryDecision::WaitThen(Duration::from_secs(wait as u64))
            } else {
                RetryDecision::Abort(RetryAbort::TooFarInFuture(at))
            }
        }
    }
}
