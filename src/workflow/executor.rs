// flowlink — Sequential workflow executor

use super::cache::{StepCache, StepFailure};
use super::template::{resolve_map, ResolveError};
use super::{Action, WorkflowDefinition};
use crate::connector::{ConnectorError, ConnectorFactory};
use crate::metrics::Metrics;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::Instrument;

/// Why a single action failed. Recorded in the cache; never aborts the run.
#[derive(Error, Debug)]
pub enum StepError {
    #[error("template resolution failed: {0}")]
    TemplateResolution(#[source] ResolveError),
    #[error("connector initialization failed: {0}")]
    ConnectorInit(#[source] ConnectorError),
    #[error("{0}")]
    ConnectorExecution(#[source] ConnectorError),
}

impl StepError {
    pub fn kind(&self) -> &'static str {
        match self {
            StepError::TemplateResolution(_) => "template_resolution_error",
            StepError::ConnectorInit(_) => "connector_init_error",
            StepError::ConnectorExecution(_) => "connector_execution_error",
        }
    }

    pub fn to_failure(&self) -> StepFailure {
        let details = match self {
            StepError::TemplateResolution(e) => format!("{}: {}", e.kind(), e.template()),
            StepError::ConnectorInit(e) | StepError::ConnectorExecution(e) => {
                e.details().unwrap_or_default()
            }
        };
        StepFailure {
            kind: self.kind(),
            message: self.to_string(),
            details,
        }
    }
}

/// Runs a workflow's actions one after another against a connector factory.
pub struct WorkflowExecutor {
    factory: Arc<dyn ConnectorFactory>,
    metrics: Option<Metrics>,
}

impl WorkflowExecutor {
    pub fn new(factory: Arc<dyn ConnectorFactory>) -> Self {
        Self {
            factory,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Execute the workflow and return every step's output.
    ///
    /// Step failures are recorded under the action id and execution moves on;
    /// the returned cache always holds one entry per step.
    pub async fn run(&self, definition: &WorkflowDefinition) -> StepCache {
        let run_id = uuid::Uuid::new_v4();
        let span = tracing::info_span!("workflow", run_id = %run_id, workflow = %definition.name);
        self.run_inner(definition).instrument(span).await
    }

    async fn run_inner(&self, definition: &WorkflowDefinition) -> StepCache {
        let start = Instant::now();
        if let Some(m) = &self.metrics {
            m.record_run_started().await;
        }
        tracing::info!(actions = definition.actions.len(), "Starting workflow");

        let mut cache = StepCache::new();
        cache.record(
            &definition.trigger.id,
            json!({ "data": {}, "config": definition.trigger.config }),
        );

        for action in &definition.actions {
            match self.run_action(action, &cache).await {
                Ok(output) => {
                    cache.record(&action.id, output);
                }
                Err(err) => {
                    tracing::error!(
                        step = %action.id,
                        service = %action.service,
                        kind = err.kind(),
                        error = %err,
                        "Step failed"
                    );
                    if let Some(m) = &self.metrics {
                        m.record_failure(err.kind()).await;
                    }
                    cache.record_failure(&action.id, &err.to_failure());
                }
            }
        }

        let failed = cache.failures().len();
        if let Some(m) = &self.metrics {
            m.record_run_finished(failed, start.elapsed()).await;
        }
        tracing::info!(
            steps = cache.len(),
            failed,
            duration_ms = %start.elapsed().as_millis(),
            "Workflow finished"
        );
        cache
    }

    async fn run_action(
        &self,
        action: &Action,
        cache: &StepCache,
    ) -> Result<serde_json::Value, StepError> {
        let params = resolve_map(&action.config, cache).map_err(StepError::TemplateResolution)?;
        tracing::debug!(step = %action.id, params = ?params, "Resolved action config");

        let connector = self
            .factory
            .get_connector(&action.service, action.connector_id(), &action.connector_config)
            .map_err(StepError::ConnectorInit)?;

        tracing::info!(
            step = %action.id,
            service = %action.service,
            action = %action.action,
            connector_id = %action.connector_id(),
            "Executing action"
        );
        let start = Instant::now();
        let result = connector.execute_action(&action.action, &params).await;
        let duration = start.elapsed();

        if let Some(m) = &self.metrics {
            m.record_action(&action.service, result.is_ok(), duration).await;
        }
        if result.is_ok() {
            tracing::info!(
                step = %action.id,
                duration_ms = %duration.as_millis(),
                "Action completed"
            );
        }
        result.map_err(StepError::ConnectorExecution)
    }
}
