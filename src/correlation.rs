//! Request/response correlation across the two directions.
//!
//! When a request is forwarded, its body is remembered under the direction it
//! travelled and its id. When a response with the same id later comes back the
//! other way, the entry is moved onto the response so filters can see which
//! request it answers.

use std::cell::RefCell;
use std::collections::HashMap;

use serde_json::{Map, Value};
use tracing::debug;

use crate::codec::Message;
use crate::filter::Direction;

/// A JSON-RPC id in canonical JSON form.
///
/// Keeps `1` and `"1"` apart, which JSON-RPC treats as different ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(id: &Value) -> Self {
        Self(id.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Pending requests keyed by (direction the request travelled, id).
///
/// Owned by one wrapper instance and only touched from its reader pumps.
/// The pumps run cooperatively on a single task, so a `RefCell` is enough;
/// no borrow is ever held across an await.
///
/// Entries whose response never arrives are kept for the life of the session.
#[derive(Debug, Default)]
pub struct CorrelationTracker {
    pending: RefCell<HashMap<(Direction, MessageId), Map<String, Value>>>,
}

impl CorrelationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember `msg` if it is a request that was just forwarded in `direction`.
    pub fn record_if_request(&self, direction: Direction, msg: &Message) {
        if !msg.is_request() {
            return;
        }
        let Some(id) = msg.id() else {
            return;
        };
        let key = (direction, MessageId::new(id));
        let mut pending = self.pending.borrow_mut();
        pending.insert(key, msg.value().clone());
        debug!(%direction, id = %id, pending = pending.len(), "tracking pending request");
    }

    /// Attach the matching request to `msg` if it is a response read in
    /// `direction`, consuming the pending entry.
    ///
    /// Returns whether a request was attached.
    pub fn attach_if_response(&self, direction: Direction, msg: &mut Message) -> bool {
        if !msg.is_response() {
            return false;
        }
        let Some(id) = msg.id() else {
            return false;
        };
        let key = (direction.opposite(), MessageId::new(id));
        let request = self.pending.borrow_mut().remove(&key);
        match request {
            Some(request) => {
                debug!(
                    %direction,
                    id = key.1.as_str(),
                    method = request.get("method").and_then(serde_json::Value::as_str).unwrap_or(""),
                    "correlated response with request"
                );
                msg.set_correlated_request(request);
                true
            }
            None => false,
        }
    }

    /// Number of requests still waiting for a response.
    pub fn pending_count(&self) -> usize {
        self.pending.borrow().len()
    }
}
