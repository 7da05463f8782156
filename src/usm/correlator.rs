//! Pairing of transport-level message IDs with request IDs.
//!
//! SNMPv3 carries two identifiers: msgID in the message header and
//! request-id inside the (possibly encrypted) scoped PDU. Reports
//! generated before the agent could decrypt quote only the msgID, so
//! both mappings are kept until the exchange completes. One msgID
//! serves all retransmits of a request; a new logical request gets a
//! fresh one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Mutex;

#[derive(Debug)]
struct Pending {
    by_msg: HashMap<i32, i32>,
    by_req: HashMap<i32, i32>,
}

#[derive(Debug)]
pub struct MessageCorrelator {
    pending: Mutex<Pending>,
    next_msg_id: AtomicI32,
}

impl Default for MessageCorrelator {
    fn default() -> MessageCorrelator {
        MessageCorrelator::new(1)
    }
}

impl MessageCorrelator {
    pub fn new(starting_msg_id: i32) -> MessageCorrelator {
        MessageCorrelator {
            pending: Mutex::new(Pending {
                by_msg: HashMap::new(),
                by_req: HashMap::new(),
            }),
            next_msg_id: AtomicI32::new(starting_msg_id.max(1)),
        }
    }

    /// Allocates a msgID for a new logical request and records the
    /// pairing. msgID zero is never handed out.
    pub fn register(&self, req_id: i32) -> i32 {
        let mut msg_id = self.next_msg_id.fetch_add(1, Ordering::Relaxed);
        while msg_id == 0 {
            msg_id = self.next_msg_id.fetch_add(1, Ordering::Relaxed);
        }
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.by_msg.insert(msg_id, req_id);
        pending.by_req.insert(req_id, msg_id);
        msg_id
    }

    /// Matches an incoming message against the outstanding requests
    /// and retires the pairing. The request-id from the scoped PDU
    /// wins when it matches; the msgID covers reports whose scoped
    /// PDU the agent could not produce. Returns the request-id the
    /// exchange belongs to, or `None` for a stray message.
    pub fn resolve(&self, msg_id: i32, req_id: i32) -> Option<i32> {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(msg) = pending.by_req.remove(&req_id) {
            pending.by_msg.remove(&msg);
            return Some(req_id);
        }
        if let Some(req) = pending.by_msg.remove(&msg_id) {
            pending.by_req.remove(&req);
            return Some(req);
        }
        debug!("dropping response with unknown msg id {}", msg_id);
        None
    }

    /// Forgets a request that will never be answered.
    pub fn cancel(&self, req_id: i32) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(msg) = pending.by_req.remove(&req_id) {
            pending.by_msg.remove(&msg);
        }
    }

    pub fn outstanding(&self) -> usize {
        let pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.by_msg.len()
    }
}
