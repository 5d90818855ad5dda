//! Standard node library
//!
//! The node kinds a control graph is built from, plus the script and
//! template helpers they share.

mod control;
mod email;
mod endpoint;
mod for_loop;
mod gate;
mod hub;
mod if_case;
pub mod js;
mod log;
pub mod render;
mod request;
mod respond;
mod script;
mod template;
mod transport;
mod wait;

pub use control::{ControlNode, ControlNodeFactory};
pub use email::{EmailNode, EmailNodeFactory};
pub use endpoint::{EndpointNode, EndpointNodeFactory};
pub use for_loop::{ForLoopNode, ForLoopNodeFactory};
pub use gate::{GateOutcome, SignalGate};
pub use hub::{HubNode, HubNodeFactory};
pub use if_case::{IfCaseNode, IfCaseNodeFactory};
pub use log::{LogLevel, LogNode, LogNodeFactory};
pub use request::{RequestNode, RequestNodeFactory};
pub use respond::{RespondNode, RespondNodeFactory};
pub use script::{ScriptNode, ScriptNodeFactory};
pub use template::{TemplateNode, TemplateNodeFactory};
pub use transport::HttpTransport;
pub use wait::{WaitNode, WaitNodeFactory};

use choreruntime::NodeRegistry;
use std::sync::Arc;

/// Register all standard nodes with a registry
pub fn register_all(registry: &mut NodeRegistry) {
    registry.register(Arc::new(EndpointNodeFactory));
    registry.register(Arc::new(RequestNodeFactory));
    registry.register(Arc::new(ScriptNodeFactory));
    registry.register(Arc::new(TemplateNodeFactory));
    registry.register(Arc::new(ControlNodeFactory));
    registry.register(Arc::new(ForLoopNodeFactory::new("forLoop")));
    registry.register(Arc::new(ForLoopNodeFactory::new("for")));
    registry.register(Arc::new(IfCaseNodeFactory));
    registry.register(Arc::new(HubNodeFactory));
    registry.register(Arc::new(WaitNodeFactory));
    registry.register(Arc::new(LogNodeFactory));
    registry.register(Arc::new(EmailNodeFactory));
    registry.register(Arc::new(RespondNodeFactory));
}

/// Registry holding every standard node
pub fn standard_registry() -> NodeRegistry {
    let mut registry = NodeRegistry::new();
    register_all(&mut registry);
    registry
}
