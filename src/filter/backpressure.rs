//! Drops editor traffic while the language server's stdin is backed up.

use tracing::warn;

use crate::codec::Message;
use crate::filter::{Direction, Filter, FilterContext, FilterResult};

/// Rejects client requests and notifications once the queue towards the
/// server holds more than `max_queue_depth` messages.
///
/// Responses are always let through: dropping one would leave the server
/// waiting on its request forever.
#[derive(Debug, Clone, Copy)]
pub struct BackpressureFilter {
    max_queue_depth: usize,
}

impl BackpressureFilter {
    pub const DEFAULT_MAX_QUEUE_DEPTH: usize = 64;

    pub fn new(max_queue_depth: usize) -> Self {
        Self { max_queue_depth }
    }
}

impl Default for BackpressureFilter {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_QUEUE_DEPTH)
    }
}

impl Filter for BackpressureFilter {
    fn name(&self) -> &'static str {
        "backpressure"
    }

    fn process(&self, msg: &Message, ctx: &FilterContext) -> anyhow::Result<FilterResult> {
        if ctx.direction == Direction::ClientToServer
            && ctx.downstream_queue_depth > self.max_queue_depth
            && (msg.is_request() || msg.is_notification())
        {
            warn!(
                method = msg.method().unwrap_or(""),
                depth = ctx.downstream_queue_depth,
                max = self.max_queue_depth,
                "dropping client message because server stdin queue is full"
            );
            return Ok(FilterResult::Reject);
        }
        Ok(FilterResult::Accept)
    }
}
