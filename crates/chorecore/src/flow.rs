use crate::{Node, Response, TagSet};
use std::collections::HashMap;
use std::fmt::Display;
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

type Cleanup = Box<dyn FnOnce() + Send>;

#[derive(Debug, Clone)]
struct Start {
    node_id: String,
    tags: Vec<String>,
}

#[derive(Default)]
struct ResponseSlot {
    sender: Option<mpsc::Sender<Response>>,
    receiver: Option<mpsc::Receiver<Response>>,
    armed: bool,
    claimed: bool,
}

/// Concrete nodes and shared state of a single run.
///
/// Created per run and dropped when the run completes. The node map is
/// written during registration only; branches read it concurrently.
pub struct FlowRegistry {
    control: String,
    endpoint: String,
    method: Option<String>,
    request_tags: TagSet,
    nodes: RwLock<HashMap<String, Arc<dyn Node>>>,
    starts: RwLock<Vec<Start>>,
    active_tags: OnceLock<TagSet>,
    response: Mutex<ResponseSlot>,
    stall: StallTracker,
    cleanup: Mutex<Vec<Cleanup>>,
    errors: Mutex<Vec<String>>,
    cancel: CancellationToken,
    stall_timeout: Option<Duration>,
}

impl FlowRegistry {
    pub fn new(
        control: impl Into<String>,
        endpoint: impl Into<String>,
        method: Option<String>,
        request_tags: TagSet,
        cancel: CancellationToken,
    ) -> Self {
        let method = method
            .map(|m| m.trim().to_uppercase())
            .filter(|m| !m.is_empty());

        Self {
            control: control.into().trim().to_string(),
            endpoint: endpoint.into().trim().to_string(),
            method,
            request_tags,
            nodes: RwLock::new(HashMap::new()),
            starts: RwLock::new(Vec::new()),
            active_tags: OnceLock::new(),
            response: Mutex::new(ResponseSlot::default()),
            stall: StallTracker::new(&cancel),
            cleanup: Mutex::new(Vec::new()),
            errors: Mutex::new(Vec::new()),
            cancel,
            stall_timeout: None,
        }
    }

    pub fn with_stall_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.stall_timeout = timeout;
        self
    }

    pub fn control(&self) -> &str {
        &self.control
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn method(&self) -> Option<&str> {
        self.method.as_deref()
    }

    /// Store a node; entry nodes matching the requested endpoint are
    /// recorded as starts.
    pub fn register(&self, node_id: impl Into<String>, node: Arc<dyn Node>) {
        let node_id = node_id.into();

        if let Some(trigger) = node.trigger() {
            if trigger.matches(&self.endpoint, self.method.as_deref()) {
                debug!(node_id = %node_id, endpoint = %self.endpoint, "entry node registered");
                self.starts
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(Start {
                        node_id: node_id.clone(),
                        tags: trigger.tags,
                    });
            }
        }

        self.nodes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(node_id, node);
    }

    pub fn get(&self, node_id: &str) -> Option<Arc<dyn Node>> {
        self.nodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(node_id)
            .cloned()
    }

    /// Snapshot of every registered node.
    pub fn nodes(&self) -> Vec<(String, Arc<dyn Node>)> {
        self.nodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, node)| (id.clone(), Arc::clone(node)))
            .collect()
    }

    /// Ids of entry nodes in registration order.
    pub fn starts(&self) -> Vec<String> {
        self.starts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|start| start.node_id.clone())
            .collect()
    }

    /// Union of the tags of all entry nodes and the request tags.
    ///
    /// Computed on first use, which must happen after registration.
    pub fn active_tags(&self) -> &TagSet {
        self.active_tags.get_or_init(|| {
            let starts = self.starts.read().unwrap_or_else(PoisonError::into_inner);
            let mut tags = self.request_tags.clone();
            tags.extend(starts.iter().flat_map(|s| s.tags.iter().cloned()));
            tags
        })
    }

    /// Create the response channel; later calls are no-ops.
    pub fn arm_response(&self) {
        let mut slot = self.response.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.armed {
            return;
        }

        let (tx, rx) = mpsc::channel(1);
        slot.sender = Some(tx);
        slot.receiver = Some(rx);
        slot.armed = true;
    }

    pub fn has_response(&self) -> bool {
        self.response
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .armed
    }

    /// Hand out the receiving side of the response channel, once.
    pub fn take_receiver(&self) -> Option<mpsc::Receiver<Response>> {
        self.response
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .receiver
            .take()
    }

    /// Deliver `response` if no one else has. Returns whether this call won.
    pub fn claim_response(&self, response: Response) -> bool {
        let mut slot = self.response.lock().unwrap_or_else(PoisonError::into_inner);
        if !slot.armed || slot.claimed {
            return false;
        }
        slot.claimed = true;

        if let Some(sender) = slot.sender.as_ref() {
            // Capacity 1 and a single writer: the slot is always free here.
            if sender.try_send(response).is_err() {
                debug!("response receiver already dropped");
            }
        }

        true
    }

    pub fn is_response_claimed(&self) -> bool {
        self.response
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .claimed
    }

    pub fn stall(&self) -> &StallTracker {
        &self.stall
    }

    pub fn stall_timeout(&self) -> Option<Duration> {
        self.stall_timeout
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn add_cleanup(&self, f: impl FnOnce() + Send + 'static) {
        self.cleanup
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(f));
    }

    pub fn add_error(&self, err: impl Display) {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(err.to_string());
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Close the run once every branch has returned.
    ///
    /// With `accepted_fallback` an unclaimed channel receives the joined
    /// branch errors or a 202 "Accepted". The channel is then closed and the
    /// cleanup callbacks run.
    pub fn finish(&self, accepted_fallback: bool) {
        {
            let mut slot = self.response.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.armed && !slot.claimed && accepted_fallback {
                let errors = self.errors();
                let fallback = if errors.is_empty() {
                    Response::new(202, "Accepted")
                } else {
                    Response::error(errors.iter().map(|e| format!("[{}]", e)).collect::<String>())
                };

                slot.claimed = true;
                if let Some(sender) = slot.sender.as_ref() {
                    let _ = sender.try_send(fallback);
                }
            }
            slot.sender = None;
        }

        self.run_cleanups();
    }

    fn run_cleanups(&self) {
        let cleanups: Vec<Cleanup> = self
            .cleanup
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();

        for f in cleanups {
            f();
        }
    }
}

#[derive(Debug, Default)]
struct Counts {
    active: usize,
    parked: usize,
}

/// Counts in-flight branches and branches parked in a gate.
///
/// The stall token fires once at least one branch is parked and every
/// in-flight branch is parked: no forward progress is possible.
pub struct StallTracker {
    counts: Mutex<Counts>,
    token: CancellationToken,
}

impl StallTracker {
    pub fn new(parent: &CancellationToken) -> Self {
        Self {
            counts: Mutex::new(Counts::default()),
            token: parent.child_token(),
        }
    }

    pub fn branch_started(&self) {
        self.update(|c| c.active += 1);
    }

    pub fn branch_finished(&self) {
        self.update(|c| c.active = c.active.saturating_sub(1));
    }

    /// Mark the calling branch as parked until the guard drops.
    pub fn park(&self) -> ParkGuard<'_> {
        self.update(|c| c.parked += 1);
        ParkGuard { tracker: self }
    }

    /// `(active, parked)`
    pub fn counts(&self) -> (usize, usize) {
        let counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        (counts.active, counts.parked)
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_stalled(&self) -> bool {
        self.token.is_cancelled()
    }

    fn update(&self, f: impl FnOnce(&mut Counts)) {
        let mut counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut counts);

        if counts.parked > 0 && counts.parked >= counts.active && !self.token.is_cancelled() {
            warn!(
                active = counts.active,
                parked = counts.parked,
                "stall detected, releasing parked branches"
            );
            self.token.cancel();
        }
    }
}

/// Releases one parked slot exactly once.
#[must_use = "the branch is unparked when the guard drops"]
pub struct ParkGuard<'a> {
    tracker: &'a StallTracker,
}

impl Drop for ParkGuard<'_> {
    fn drop(&mut self) {
        self.tracker
            .update(|c| c.parked = c.parked.saturating_sub(1));
    }
}
