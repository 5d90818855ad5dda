use crate::{
    Connection, Envelope, FlowLauncher, FlowRegistry, Host, NodeConfig, NodeError, Payload,
};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;

/// Tags active for one run.
pub type TagSet = BTreeSet<String>;

/// A node without tags is always enabled, otherwise one of its tags must be
/// active.
pub fn tags_enabled(node_tags: &[String], active: &TagSet) -> bool {
    node_tags.is_empty() || node_tags.iter().any(|tag| active.contains(tag))
}

/// Core trait that all graph nodes implement
#[async_trait]
pub trait Node: Send + Sync {
    /// Registered type name (e.g., "script", "request")
    fn node_type(&self) -> &str;

    /// Wiring and per-run flags shared by every node kind
    fn ports(&self) -> &Ports;

    /// Execute the node for one incoming branch.
    ///
    /// `input` is the name of the input the value arrived on.
    async fn run(
        &self,
        ctx: &NodeContext,
        payload: Payload,
        input: &str,
    ) -> Result<Envelope, NodeError>;

    /// Optional: Validate configuration before the run starts
    fn validate(&self) -> Result<(), NodeError> {
        Ok(())
    }

    /// Optional: Pull one-time external data (auth, templates, settings)
    async fn fetch(&self, _host: &dyn Host) -> Result<(), NodeError> {
        Ok(())
    }

    fn is_fetched(&self) -> bool {
        true
    }

    /// True when the node can terminate the run with a response
    fn is_respond(&self) -> bool {
        false
    }

    /// Entry point information, only for nodes that can start a run
    fn trigger(&self) -> Option<Trigger> {
        None
    }

    /// Record the edge from `source` and apply the tag filter.
    fn active_input(&self, source: &str, flow: &FlowRegistry) {
        self.ports().activate(source, flow.active_tags());
    }

    fn node_id(&self) -> &str {
        self.ports().node_id()
    }

    fn next(&self, index: usize) -> &[Connection] {
        self.ports().next(index)
    }

    fn next_count(&self) -> usize {
        self.ports().next_count()
    }

    fn check(&self) {
        self.ports().check();
    }

    fn is_checked(&self) -> bool {
        self.ports().is_checked()
    }

    fn is_disabled(&self) -> bool {
        self.ports().is_disabled()
    }
}

/// Entry-node description used when registering nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Trigger {
    pub endpoint: String,
    pub methods: Vec<String>,
    pub tags: Vec<String>,
}

impl Trigger {
    /// An empty requested method or an empty declared method list matches
    /// any method.
    pub fn matches(&self, endpoint: &str, method: Option<&str>) -> bool {
        if self.endpoint.trim() != endpoint.trim() {
            return false;
        }

        match method.map(str::trim) {
            None | Some("") => true,
            Some(method) => {
                self.methods.is_empty()
                    || self
                        .methods
                        .iter()
                        .any(|declared| declared.trim().eq_ignore_ascii_case(method))
            }
        }
    }
}

/// One incoming connection of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputSlot {
    pub node: String,
    pub input: String,
    pub active: bool,
}

/// Wiring of a node plus its prefetch flags.
///
/// Outputs are ordered by output name; the position is the index used by
/// branch selection.
#[derive(Debug)]
pub struct Ports {
    node_id: String,
    outputs: Vec<Vec<Connection>>,
    inputs: Mutex<Vec<InputSlot>>,
    input_names: Vec<String>,
    tags: Vec<String>,
    checked: AtomicBool,
    disabled: AtomicBool,
}

impl Ports {
    pub fn new(node_id: impl Into<String>, config: &NodeConfig) -> Self {
        let inputs = config
            .inputs
            .iter()
            .flat_map(|(name, port)| {
                port.connections.iter().map(move |conn| InputSlot {
                    node: conn.node.clone(),
                    input: name.clone(),
                    active: false,
                })
            })
            .collect();

        Self {
            node_id: node_id.into(),
            outputs: config.sorted_outputs(),
            inputs: Mutex::new(inputs),
            input_names: config.input_names(),
            tags: config.list_field("tags"),
            checked: AtomicBool::new(false),
            disabled: AtomicBool::new(false),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Connections of output `index`; empty when the output does not exist.
    pub fn next(&self, index: usize) -> &[Connection] {
        self.outputs.get(index).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn next_count(&self) -> usize {
        self.outputs.len()
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Every declared input name, sorted.
    pub fn input_names(&self) -> &[String] {
        &self.input_names
    }

    /// Activate the inputs fed by `source`.
    ///
    /// Returns the input names that became active with this call. A node
    /// whose tags are not active is disabled instead and nothing is
    /// activated.
    pub fn activate(&self, source: &str, active_tags: &TagSet) -> Vec<String> {
        if !tags_enabled(&self.tags, active_tags) {
            self.disabled.store(true, Ordering::SeqCst);
            return Vec::new();
        }

        let mut inputs = self.inputs.lock().unwrap_or_else(PoisonError::into_inner);
        let mut activated = Vec::new();
        for slot in inputs.iter_mut().filter(|slot| slot.node == source) {
            if !slot.active {
                slot.active = true;
                activated.push(slot.input.clone());
            }
        }

        activated
    }

    pub fn is_input_active(&self, name: &str) -> bool {
        self.inputs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|slot| slot.active && slot.input == name)
    }

    /// Distinct active input names, sorted.
    pub fn active_input_names(&self) -> BTreeSet<String> {
        self.inputs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|slot| slot.active)
            .map(|slot| slot.input.clone())
            .collect()
    }

    pub fn check(&self) {
        self.checked.store(true, Ordering::SeqCst);
    }

    pub fn is_checked(&self) -> bool {
        self.checked.load(Ordering::SeqCst)
    }

    pub fn disable(&self) {
        self.disabled.store(true, Ordering::SeqCst);
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::SeqCst)
    }
}

/// Execution context passed to each node run
#[derive(Clone)]
pub struct NodeContext {
    /// Id of the node being run
    pub node_id: String,

    /// Registry of the run the node belongs to
    pub flow: Arc<FlowRegistry>,

    /// Storage and transport collaborators
    pub host: Arc<dyn Host>,

    /// Starts nested runs for Control nodes
    pub launcher: Arc<dyn FlowLauncher>,
}

impl NodeContext {
    pub fn new(
        node_id: impl Into<String>,
        flow: Arc<FlowRegistry>,
        host: Arc<dyn Host>,
        launcher: Arc<dyn FlowLauncher>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            flow,
            host,
            launcher,
        }
    }

    /// Cancellation token of the run
    pub fn cancellation(&self) -> &CancellationToken {
        self.flow.cancellation()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(items: &[&str]) -> TagSet {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn script_config() -> NodeConfig {
        NodeConfig::new("script")
            .with_input("input_1", Connection::new("a", "output_1"))
            .with_input("input_3", Connection::new("b", "output_1"))
            .with_input("input_4", Connection::new("c", "output_2"))
            .with_output("output_2", Connection::new("y", "input_1"))
            .with_output("output_1", Connection::new("x", "input_1"))
    }

    #[test]
    fn activation_is_reported_once() {
        let ports = Ports::new("s", &script_config());

        assert_eq!(ports.activate("a", &TagSet::new()), vec!["input_1"]);
        assert!(ports.activate("a", &TagSet::new()).is_empty());
        assert!(ports.is_input_active("input_1"));
        assert!(!ports.is_input_active("input_3"));
        assert_eq!(ports.input_names(), ["input_1", "input_3", "input_4"]);
    }

    #[test]
    fn next_out_of_range_is_empty() {
        let ports = Ports::new("s", &script_config());

        assert_eq!(ports.next_count(), 2);
        assert_eq!(ports.next(0)[0].node, "x");
        assert_eq!(ports.next(1)[0].node, "y");
        assert!(ports.next(2).is_empty());
    }

    #[test]
    fn tag_filter_disables_node() {
        let config = script_config().with_data("tags", "blue, green");
        let ports = Ports::new("s", &config);

        assert!(ports.activate("a", &tags(&["red"])).is_empty());
        assert!(ports.is_disabled());

        let ports = Ports::new("s", &config);
        ports.activate("a", &tags(&["green"]));
        assert!(!ports.is_disabled());
    }

    #[test]
    fn trigger_matches_methods() {
        let trigger = Trigger {
            endpoint: "e1".into(),
            methods: vec!["post".into(), "PUT".into()],
            tags: vec![],
        };

        assert!(trigger.matches("e1", None));
        assert!(trigger.matches(" e1 ", Some("POST")));
        assert!(!trigger.matches("e1", Some("GET")));
        assert!(!trigger.matches("e2", Some("POST")));

        let any = Trigger {
            endpoint: "e1".into(),
            ..Trigger::default()
        };
        assert!(any.matches("e1", Some("DELETE")));
    }
}
