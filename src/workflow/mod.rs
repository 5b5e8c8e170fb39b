// flowlink — Workflow definitions and execution

pub mod cache;
pub mod executor;
pub mod parser;
pub mod template;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use cache::{StepCache, StepFailure};
pub use executor::{StepError, WorkflowExecutor};
pub use parser::{load_definition, parse_definition, DefinitionError};
pub use template::{resolve_value, ResolveError};

/// A workflow: one trigger followed by an ordered list of actions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub trigger: Trigger,
    pub actions: Vec<Action>,
}

/// The event that starts a workflow. Triggers are not polled; their `config`
/// seeds the step cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trigger {
    pub id: String,
    pub service: String,
    pub event: String,
    pub config: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub id: String,
    pub service: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connector_id: Option<String>,
    #[serde(default)]
    pub config: Map<String, Value>,
    #[serde(default)]
    pub connector_config: Map<String, Value>,
}

impl Action {
    /// The connector instance key; defaults to the action's own id.
    pub fn connector_id(&self) -> &str {
        self.connector_id.as_deref().unwrap_or(&self.id)
    }
}
