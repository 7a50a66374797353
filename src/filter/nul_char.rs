//! Strips NUL characters from completion sort keys.
//!
//! Some language servers emit `sortText` values containing `\u0000`, which
//! several editors choke on. This filter rewrites them to `-` on the way back
//! to the client.

use serde_json::Value;
use tracing::debug;

use crate::codec::Message;
use crate::filter::{Filter, FilterContext, FilterResult};

const COMPLETION_METHOD: &str = "textDocument/completion";
const SORT_TEXT: &str = "sortText";
const NUL: char = '\u{0}';
const REPLACEMENT: &str = "-";

/// Replaces NUL characters in `sortText` of completion results.
///
/// Only responses whose correlated request was `textDocument/completion` are
/// inspected. The result may be a bare item list or a `CompletionList` with
/// an `items` field.
#[derive(Debug, Clone, Copy, Default)]
pub struct NulCharFilter;

impl Filter for NulCharFilter {
    fn name(&self) -> &'static str {
        "nul_char"
    }

    fn process(&self, msg: &Message, _ctx: &FilterContext) -> anyhow::Result<FilterResult> {
        if !msg.is_response() {
            return Ok(FilterResult::Accept);
        }
        let is_completion = msg
            .correlated_request()
            .and_then(|req| req.get("method"))
            .and_then(Value::as_str)
            == Some(COMPLETION_METHOD);
        if !is_completion || !msg.value().contains_key("result") {
            return Ok(FilterResult::Accept);
        }

        let mut value = msg.value().clone();
        let items = match value.get_mut("result") {
            Some(Value::Array(items)) => items,
            Some(Value::Object(list)) => match list.get_mut("items") {
                Some(Value::Array(items)) => items,
                _ => return Ok(FilterResult::Accept),
            },
            _ => return Ok(FilterResult::Accept),
        };

        let mut replaced = 0usize;
        for item in items.iter_mut() {
            if let Some(Value::String(sort_text)) = item.get_mut(SORT_TEXT) {
                if sort_text.contains(NUL) {
                    *sort_text = sort_text.replace(NUL, REPLACEMENT);
                    replaced += 1;
                }
            }
        }

        if replaced == 0 {
            return Ok(FilterResult::Accept);
        }
        debug!(id = ?msg.id(), replaced, "rewrote NUL characters in completion sortText");
        Ok(FilterResult::Replace(Message::from_value(value)?))
    }
}
