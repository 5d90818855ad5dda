use chorecore::{bytes_to_data, FlowRegistry, NodeContext, NodeError, Payload};
use serde_json::Value as JsonValue;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How a primary branch left [`SignalGate::wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    Released,
    /// Deadlock detected or the park timeout elapsed
    Stalled,
    Canceled,
    /// No signal input is wired to this node
    Unarmed,
}

#[derive(Clone)]
struct Armed {
    release: CancellationToken,
    feedback: CancellationToken,
}

#[derive(Default)]
struct GateState {
    armed: Option<Armed>,
    received: bool,
    value: Option<Payload>,
    primary_waiting: bool,
}

/// Single-shot hand-off between a signalling branch and a primary branch
/// of the same run.
///
/// The gate is armed during prefetch when its signal input is activated.
/// A signal delivered before the primary arrives is not lost.
#[derive(Default)]
pub struct SignalGate {
    state: Mutex<GateState>,
}

impl SignalGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the release and feedback tokens; repeated calls are no-ops.
    pub fn arm(&self, flow: &FlowRegistry) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.armed.is_some() {
            return;
        }

        let armed = Armed {
            release: CancellationToken::new(),
            feedback: CancellationToken::new(),
        };
        let tokens = armed.clone();
        flow.add_cleanup(move || {
            tokens.release.cancel();
            tokens.feedback.cancel();
        });
        state.armed = Some(armed);
    }

    pub fn is_armed(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .armed
            .is_some()
    }

    /// Deliver the signal and release the primary branch.
    ///
    /// Returns false when a signal was already delivered. When a primary
    /// branch is blocked, waits until it has resumed.
    pub async fn signal(&self, value: Option<Payload>) -> bool {
        let feedback = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if state.received {
                return false;
            }
            state.received = true;
            state.value = value;

            match state.armed.as_ref() {
                Some(armed) => {
                    armed.release.cancel();
                    state.primary_waiting.then(|| armed.feedback.clone())
                }
                None => None,
            }
        };

        if let Some(feedback) = feedback {
            feedback.cancelled().await;
        }

        true
    }

    /// Value delivered with the signal, if any.
    pub fn value(&self) -> Option<Payload> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .value
            .clone()
    }

    /// Block the primary branch until the signal arrives.
    ///
    /// While blocked the branch counts as parked for stall detection.
    pub async fn wait(&self, ctx: &NodeContext) -> GateOutcome {
        let armed = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            let Some(armed) = state.armed.clone() else {
                return GateOutcome::Unarmed;
            };
            state.primary_waiting = true;
            armed
        };

        // Acknowledge the signalling branch however this wait ends.
        let _feedback = armed.feedback.drop_guard();

        if armed.release.is_cancelled() {
            return GateOutcome::Released;
        }

        let stall = ctx.flow.stall();
        let _parked = stall.park();

        // The stall token is a child of the run token, so cancellation is
        // checked first.
        tokio::select! {
            biased;
            _ = armed.release.cancelled() => GateOutcome::Released,
            _ = ctx.cancellation().cancelled() => GateOutcome::Canceled,
            _ = stall.token().cancelled() => GateOutcome::Stalled,
            _ = expire(ctx.flow.stall_timeout()) => GateOutcome::Stalled,
        }
    }
}

/// Template data of a node gated by a value input.
///
/// The incoming side value wins; otherwise the primary branch waits for the
/// value input when one is wired. `Ok(None)` ends the branch quietly.
pub async fn gated_data(
    gate: &SignalGate,
    ctx: &NodeContext,
    payload: &Payload,
) -> Result<Option<JsonValue>, NodeError> {
    if let Some(values) = payload.values.as_deref() {
        return Ok(Some(bytes_to_data(Some(values))));
    }

    match gate.wait(ctx).await {
        GateOutcome::Released | GateOutcome::Unarmed => {}
        GateOutcome::Stalled => return Err(NodeError::Stalled(ctx.node_id.clone())),
        GateOutcome::Canceled => {
            tracing::warn!(node_id = %ctx.node_id, "program closed, terminated node");
            return Ok(None);
        }
    }

    let value = gate.value().and_then(|p| p.data);
    Ok(Some(bytes_to_data(value.as_deref())))
}

async fn expire(timeout: Option<Duration>) {
    match timeout {
        Some(timeout) => tokio::time::sleep(timeout).await,
        None => std::future::pending().await,
    }
}
