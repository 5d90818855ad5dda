use crate::gate::{GateOutcome, SignalGate};
use async_trait::async_trait;
use chorecore::{Envelope, FlowRegistry, Node, NodeConfig, NodeContext, NodeError, Payload, Ports};
use choreruntime::{NodeFactory, NodeMetadata};
use std::sync::Arc;

pub(crate) const SIGNAL_INPUT: &str = "input_2";

/// Holds the primary branch until a sibling branch signals on `input_2`.
pub struct WaitNode {
    ports: Ports,
    gate: SignalGate,
}

impl WaitNode {
    pub fn new(node_id: &str, config: &NodeConfig) -> Self {
        Self {
            ports: Ports::new(node_id, config),
            gate: SignalGate::new(),
        }
    }
}

#[async_trait]
impl Node for WaitNode {
    fn node_type(&self) -> &str {
        "wait"
    }

    fn ports(&self) -> &Ports {
        &self.ports
    }

    async fn run(
        &self,
        ctx: &NodeContext,
        payload: Payload,
        input: &str,
    ) -> Result<Envelope, NodeError> {
        if input == SIGNAL_INPUT {
            if !self.gate.signal(None).await {
                tracing::debug!("signal already received, ignored");
            }
            return Ok(Envelope::Stop);
        }

        match self.gate.wait(ctx).await {
            GateOutcome::Released => Ok(Envelope::PassThrough(payload)),
            GateOutcome::Stalled => {
                tracing::warn!("stall detected, terminated node wait");
                Ok(Envelope::Stop)
            }
            GateOutcome::Canceled => {
                tracing::warn!("program closed, terminated node wait");
                Ok(Envelope::Stop)
            }
            GateOutcome::Unarmed => Err(NodeError::MissingSignal),
        }
    }

    fn active_input(&self, source: &str, flow: &FlowRegistry) {
        let activated = self.ports.activate(source, flow.active_tags());
        if activated.iter().any(|name| name == SIGNAL_INPUT) {
            self.gate.arm(flow);
        }
    }
}

pub struct WaitNodeFactory;

impl NodeFactory for WaitNodeFactory {
    fn create(&self, node_id: &str, config: &NodeConfig) -> Result<Arc<dyn Node>, NodeError> {
        Ok(Arc::new(WaitNode::new(node_id, config)))
    }

    fn node_type(&self) -> &str {
        "wait"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::new("Pause a branch until a sibling branch signals", "flow")
            .input("input_1", "Value to forward once released", true)
            .input("input_2", "Release signal, first delivery only", true)
            .output("output_1", "Forwarded value")
    }
}
