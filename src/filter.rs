//! Message filter pipeline.
//!
//! Every message read from either side passes through an ordered list of
//! [`Filter`]s before it is queued for the other side. A filter can let the
//! message through, swap it for another message, or drop it.
//!
//! # Failure policy
//!
//! The pipeline is fail-open: a filter that returns an error is logged and
//! treated as if it had accepted the message. Filters only ever fix up or
//! throttle traffic, so skipping one is always safer than stalling the
//! editor session.

mod backpressure;
mod nul_char;

pub use backpressure::BackpressureFilter;
pub use nul_char::NulCharFilter;

use std::fmt;

use tracing::warn;

use crate::codec::Message;
use crate::config::WrapperConfig;

/// Which way a message is travelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Editor to language server.
    ClientToServer,
    /// Language server to editor.
    ServerToClient,
}

impl Direction {
    pub fn opposite(self) -> Self {
        match self {
            Direction::ClientToServer => Direction::ServerToClient,
            Direction::ServerToClient => Direction::ClientToServer,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::ClientToServer => "client->server",
            Direction::ServerToClient => "server->client",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a filter sees besides the message itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterContext {
    pub direction: Direction,
    /// Messages waiting in the destination queue when the filter runs.
    pub downstream_queue_depth: usize,
}

/// Outcome of running a filter (or the whole pipeline) on a message.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterResult {
    /// Forward the message unchanged.
    Accept,
    /// Drop the message. Rejected requests get an error response.
    Reject,
    /// Forward this message instead.
    Replace(Message),
}

/// A pluggable policy applied to in-flight messages.
///
/// Filters must not keep state about the session; correlation and queue
/// depth are handed to them through the message and [`FilterContext`].
pub trait Filter {
    /// Name used in log events.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    fn process(&self, msg: &Message, ctx: &FilterContext) -> anyhow::Result<FilterResult>;
}

/// The filters installed by the binary, in evaluation order.
pub fn default_filters(config: &WrapperConfig) -> Vec<Box<dyn Filter>> {
    vec![
        Box::new(BackpressureFilter::new(config.max_queue_depth)),
        Box::new(NulCharFilter),
    ]
}

/// Run `msg` through `filters` in order.
///
/// The first filter that does not accept decides the result. A filter error
/// counts as acceptance.
pub fn run_pipeline(
    filters: &[Box<dyn Filter>],
    msg: &Message,
    ctx: &FilterContext,
) -> FilterResult {
    for filter in filters {
        match filter.process(msg, ctx) {
            Ok(FilterResult::Accept) => continue,
            Ok(result) => return result,
            Err(e) => {
                warn!(
                    filter = filter.name(),
                    direction = %ctx.direction,
                    method = msg.method().unwrap_or(""),
                    error = %format!("{e:#}"),
                    "filter failed, forwarding message unchanged"
                );
            }
        }
    }
    FilterResult::Accept
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn message(value: Value) -> Message {
        match value {
            Value::Object(map) => Message::from_value(map).expect("valid message"),
            other => panic!("not an object: {other}"),
        }
    }

    fn ctx() -> FilterContext {
        FilterContext {
            direction: Direction::ClientToServer,
            downstream_queue_depth: 0,
        }
    }

    /// Returns a fixed result and counts how often it ran.
    struct Fixed {
        result: FilterResult,
        calls: Arc<AtomicUsize>,
    }

    impl Fixed {
        fn boxed(result: FilterResult) -> (Box<dyn Filter>, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            let filter = Fixed {
                result,
                calls: Arc::clone(&calls),
            };
            (Box::new(filter), calls)
        }
    }

    impl Filter for Fixed {
        fn process(&self, _msg: &Message, _ctx: &FilterContext) -> anyhow::Result<FilterResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.result.clone())
        }
    }

    struct Broken;

    impl Filter for Broken {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn process(&self, _msg: &Message, _ctx: &FilterContext) -> anyhow::Result<FilterResult> {
            anyhow::bail!("policy blew up")
        }
    }

    #[test]
    fn test_empty_pipeline_accepts() {
        let msg = message(json!({"jsonrpc": "2.0", "method": "m"}));
        assert_eq!(run_pipeline(&[], &msg, &ctx()), FilterResult::Accept);
    }

    #[test]
    fn test_first_non_accept_short_circuits() {
        let msg = message(json!({"jsonrpc": "2.0", "id": 1, "method": "m"}));
        let (accept, accept_calls) = Fixed::boxed(FilterResult::Accept);
        let (reject, reject_calls) = Fixed::boxed(FilterResult::Reject);
        let (later, later_calls) = Fixed::boxed(FilterResult::Accept);

        let result = run_pipeline(&[accept, reject, later], &msg, &ctx());

        assert_eq!(result, FilterResult::Reject);
        assert_eq!(accept_calls.load(Ordering::SeqCst), 1);
        assert_eq!(reject_calls.load(Ordering::SeqCst), 1);
        assert_eq!(later_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_replace_is_returned() {
        let msg = message(json!({"jsonrpc": "2.0", "method": "m"}));
        let replacement = message(json!({"jsonrpc": "2.0", "method": "other"}));
        let (replace, _) = Fixed::boxed(FilterResult::Replace(replacement.clone()));

        assert_eq!(
            run_pipeline(&[replace], &msg, &ctx()),
            FilterResult::Replace(replacement)
        );
    }

    #[test]
    fn test_failing_filter_is_skipped() {
        let msg = message(json!({"jsonrpc": "2.0", "method": "m"}));
        let (after, after_calls) = Fixed::boxed(FilterResult::Accept);
        let filters: Vec<Box<dyn Filter>> = vec![Box::new(Broken), after];

        assert_eq!(run_pipeline(&filters, &msg, &ctx()), FilterResult::Accept);
        assert_eq!(after_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_direction_opposite() {
        assert_eq!(Direction::ClientToServer.opposite(), Direction::ServerToClient);
        assert_eq!(Direction::ServerToClient.opposite(), Direction::ClientToServer);
        assert_eq!(Direction::ClientToServer.to_string(), "client->server");
    }

    #[test]
    fn test_default_filters_order() {
        let filters = default_filters(&WrapperConfig::default());
        let names: Vec<_> = filters.iter().map(|f| f.name()).collect();
        assert_eq!(names, vec!["backpressure", "nul_char"]);
    }
}
