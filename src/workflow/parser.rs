// flowlink — Workflow definition loading and validation

use crate::workflow::WorkflowDefinition;
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

/// Errors raised before any step runs. These abort the whole run.
#[derive(Error, Debug)]
pub enum DefinitionError {
    #[error("workflow definition not found: {0}")]
    NotFound(String),
    #[error("failed to read workflow definition: {0}")]
    Read(#[from] std::io::Error),
    #[error("invalid workflow JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid workflow YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid workflow definition: {0}")]
    Invalid(String),
}

/// Load a workflow definition from disk. `.yaml`/`.yml` files are parsed as
/// YAML, everything else as JSON.
pub fn load_definition(path: &Path) -> Result<WorkflowDefinition, DefinitionError> {
    if !path.exists() {
        return Err(DefinitionError::NotFound(path.display().to_string()));
    }
    let content = std::fs::read_to_string(path)?;

    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );
    let definition = if is_yaml {
        let definition: WorkflowDefinition = serde_yaml::from_str(&content)?;
        validate(&definition)?;
        definition
    } else {
        parse_definition(&content)?
    };

    tracing::info!(
        workflow = %definition.name,
        path = %path.display(),
        actions = definition.actions.len(),
        "Loaded workflow definition"
    );
    Ok(definition)
}

/// Parse and validate a JSON workflow definition.
pub fn parse_definition(json: &str) -> Result<WorkflowDefinition, DefinitionError> {
    let definition: WorkflowDefinition = serde_json::from_str(json)?;
    validate(&definition)?;
    Ok(definition)
}

/// Checks the few things execution relies on: non-empty names and unique step ids.
pub fn validate(definition: &WorkflowDefinition) -> Result<(), DefinitionError> {
    if definition.trigger.id.is_empty() {
        return Err(DefinitionError::Invalid("trigger id cannot be empty".into()));
    }

    let mut seen = HashSet::new();
    seen.insert(definition.trigger.id.as_str());

    for (i, action) in definition.actions.iter().enumerate() {
        if action.id.is_empty() {
            return Err(DefinitionError::Invalid(format!("action {} has an empty id", i)));
        }
        if action.service.is_empty() || action.action.is_empty() {
            return Err(DefinitionError::Invalid(format!(
                "action '{}' is missing a service or action name",
                action.id
            )));
        }
        if !seen.insert(action.id.as_str()) {
            return Err(DefinitionError::Invalid(format!(
                "duplicate step id '{}'",
                action.id
            )));
        }
    }

    Ok(())
}
