use chorecore::{
    Connection, Envelope, FlowLauncher, FlowRegistry, Host, Node, NodeContext, Payload,
};
use futures::future::{BoxFuture, FutureExt};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio_util::task::TaskTracker;
use tracing::Instrument;

/// Runs one prepared flow: one task per edge traversal.
#[derive(Clone)]
pub struct FlowExecutor {
    flow: Arc<FlowRegistry>,
    host: Arc<dyn Host>,
    launcher: Arc<dyn FlowLauncher>,
    tracker: TaskTracker,
    span: tracing::Span,
}

impl FlowExecutor {
    pub fn new(
        flow: Arc<FlowRegistry>,
        host: Arc<dyn Host>,
        launcher: Arc<dyn FlowLauncher>,
    ) -> Self {
        Self {
            flow,
            host,
            launcher,
            tracker: TaskTracker::new(),
            span: tracing::Span::current(),
        }
    }

    /// Start a branch at every entry node and wait for all branches.
    ///
    /// The response channel is closed once the last branch has returned.
    pub async fn run(self, payload: Payload, accepted_fallback: bool) {
        for start in self.flow.starts() {
            self.branch(&[Connection::new(start, "")], &payload);
        }

        // Branches spawn their successors before they finish, so the
        // tracker only drains once the whole run is done.
        self.tracker.close();
        self.tracker.wait().await;

        self.flow.finish(accepted_fallback);

        let errors = self.flow.errors();
        if errors.is_empty() {
            tracing::info!("completed control flow");
        } else {
            tracing::info!(errors = errors.len(), "completed control flow with errors");
        }
    }

    fn branch(&self, nexts: &[Connection], payload: &Payload) {
        for next in nexts {
            self.flow.stall().branch_started();
            let guard = BranchGuard {
                flow: Arc::clone(&self.flow),
            };

            let run = self.clone().branch_run(next.clone(), payload.clone());
            self.tracker.spawn(
                async move {
                    let _guard = guard;
                    run.await;
                }
                .instrument(self.span.clone()),
            );
        }
    }

    fn branch_run(self, next: Connection, payload: Payload) -> BoxFuture<'static, ()> {
        async move {
            let flow = Arc::clone(&self.flow);
            let target = next.node.clone();

            let caught = AssertUnwindSafe(self.step(next, payload)).catch_unwind().await;
            if let Err(panic) = caught {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());

                tracing::error!("panic: node {} cannot run: {}", target, reason);
                flow.add_error(format!("panic: {} cannot run: {}", target, reason));
            }
        }
        .boxed()
    }

    async fn step(&self, next: Connection, payload: Payload) {
        if self.flow.cancellation().is_cancelled() {
            return;
        }

        let Some(node) = self.flow.get(&next.node) else {
            tracing::error!("node {} not found", next.node);
            return;
        };

        if node.is_disabled() {
            return;
        }

        let span = tracing::debug_span!(
            parent: &self.span,
            "node",
            node_id = %next.node,
            node_type = node.node_type()
        );
        let ctx = NodeContext::new(
            next.node.clone(),
            Arc::clone(&self.flow),
            Arc::clone(&self.host),
            Arc::clone(&self.launcher),
        );

        let result = async {
            tracing::debug!("running [{}]", node.node_type());
            node.run(&ctx, payload, &next.port).await
        }
        .instrument(span.clone())
        .await;

        span.in_scope(|| match result {
            Ok(envelope) => {
                tracing::debug!("complete [{}]", node.node_type());
                self.dispatch(node.as_ref(), envelope);
            }
            Err(e) => {
                tracing::error!(error = %e, "{} cannot run", node.node_type());
                self.flow.add_error(format!(
                    "{} cannot run; nodeID=[{}]: {}",
                    node.node_type(),
                    next.node,
                    e
                ));
            }
        });
    }

    fn dispatch(&self, node: &dyn Node, envelope: Envelope) {
        match envelope {
            Envelope::Stop => {}
            Envelope::Value(payload) | Envelope::PassThrough(payload) => {
                self.branch(node.next(0), &payload);
            }
            Envelope::Respond(response) => {
                if self.flow.claim_response(response) {
                    tracing::debug!("response delivered");
                } else {
                    tracing::debug!("response already claimed, dropped");
                }
            }
            Envelope::Many(items) => {
                for payload in &items {
                    self.branch(node.next(0), payload);
                }
            }
            Envelope::Select { payload, outputs } => {
                for index in outputs {
                    self.branch(node.next(index), &payload);
                }
            }
        }
    }
}

/// Marks the branch as finished however its task ends.
struct BranchGuard {
    flow: Arc<FlowRegistry>,
}

impl Drop for BranchGuard {
    fn drop(&mut self) {
        self.flow.stall().branch_finished();
    }
}
