use crate::FlowError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::{BTreeMap, HashMap};

/// Complete control definition, keyed by node id.
pub type GraphDefinition = HashMap<String, NodeConfig>;

/// Decode the stored control content into a graph definition.
///
/// No partial graphs are accepted: any malformed node fails the whole parse.
pub fn parse_graph(content: &[u8]) -> Result<GraphDefinition, FlowError> {
    serde_json::from_slice(content)
        .map_err(|e| FlowError::Parse(format!("cannot unmarshal control content: {}", e)))
}

/// One edge endpoint.
///
/// In an output list `port` names the input of the target node, in an input
/// list it names the output of the source node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub node: String,
    #[serde(rename = "output", alias = "input", default)]
    pub port: String,
}

impl Connection {
    pub fn new(node: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            port: port.into(),
        }
    }
}

/// Connections of a single named port.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawPort")]
pub struct PortConnections {
    pub connections: Vec<Connection>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawPort {
    Wrapped {
        #[serde(default)]
        connections: Vec<Connection>,
    },
    Bare(Vec<Connection>),
}

impl From<RawPort> for PortConnections {
    fn from(raw: RawPort) -> Self {
        match raw {
            RawPort::Wrapped { connections } | RawPort::Bare(connections) => {
                Self { connections }
            }
        }
    }
}

/// One node entry inside a control.
///
/// Editor-only fields (html, position, class...) are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(rename = "name")]
    pub node_type: String,
    #[serde(default)]
    pub data: Map<String, JsonValue>,
    #[serde(default)]
    pub inputs: BTreeMap<String, PortConnections>,
    #[serde(default)]
    pub outputs: BTreeMap<String, PortConnections>,
}

impl NodeConfig {
    pub fn new(node_type: impl Into<String>) -> Self {
        Self {
            node_type: node_type.into(),
            ..Self::default()
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn with_input(mut self, port: impl Into<String>, from: Connection) -> Self {
        self.inputs
            .entry(port.into())
            .or_default()
            .connections
            .push(from);
        self
    }

    pub fn with_output(mut self, port: impl Into<String>, to: Connection) -> Self {
        self.outputs
            .entry(port.into())
            .or_default()
            .connections
            .push(to);
        self
    }

    /// Output connection groups ordered by output name.
    ///
    /// The position in the returned list is the output index used by
    /// branch selection: for two-output nodes index 0 is false/error and
    /// index 1 is true/success.
    pub fn sorted_outputs(&self) -> Vec<Vec<Connection>> {
        // BTreeMap iterates in lexicographic key order.
        self.outputs
            .values()
            .map(|port| port.connections.clone())
            .collect()
    }

    /// Declared input names in sorted order.
    pub fn input_names(&self) -> Vec<String> {
        self.inputs.keys().cloned().collect()
    }

    /// Raw string field; missing or non-string values give "".
    pub fn str_field(&self, key: &str) -> &str {
        self.data.get(key).and_then(JsonValue::as_str).unwrap_or("")
    }

    /// Boolean field, accepting `true` or the string "true".
    pub fn bool_field(&self, key: &str) -> bool {
        match self.data.get(key) {
            Some(JsonValue::Bool(b)) => *b,
            Some(JsonValue::String(s)) => s.trim() == "true",
            _ => false,
        }
    }

    /// List field given either as an array of strings or a comma/space
    /// separated string.
    pub fn list_field(&self, key: &str) -> Vec<String> {
        match self.data.get(key) {
            Some(JsonValue::String(s)) => split_list(s),
            Some(JsonValue::Array(items)) => items
                .iter()
                .filter_map(JsonValue::as_str)
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Field that may be stored as a number or as a numeric string.
    pub fn text_field(&self, key: &str) -> String {
        match self.data.get(key) {
            Some(JsonValue::String(s)) => s.trim().to_string(),
            Some(JsonValue::Number(n)) => n.to_string(),
            _ => String::new(),
        }
    }
}

/// Split a comma and/or whitespace separated list.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.replace(',', " ")
        .split_whitespace()
        .map(str::to_string)
        .collect()
}
