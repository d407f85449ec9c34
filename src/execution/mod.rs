//! Execution engine for plans
//!
//! Runs each plan step against the tool registry and records an
//! observation per step. No LLM is involved here.

use crate::error::ForecastError;
use crate::models::{ExecutionStatus, Observation, Plan};
use crate::tools::ToolRegistry;
use crate::Result;
use chrono::Utc;
use std::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

/// Maximum steps allowed per plan
const MAX_STEPS_PER_PLAN: usize = 10;

pub struct ExecutionEngine {
    tool_registry: ToolRegistry,
}

impl ExecutionEngine {
    pub fn new(tool_registry: ToolRegistry) -> Self {
        Self { tool_registry }
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tool_registry
    }

    /// Execute every step in order. Steps are independent, so a failed step
    /// is recorded and the rest still run.
    pub async fn execute_plan(&self, plan: &Plan) -> Result<Vec<Observation>> {
        if plan.steps.len() > MAX_STEPS_PER_PLAN {
            return Err(ForecastError::InvalidToolInput(format!(
                "plan exceeds maximum allowed steps ({})",
                MAX_STEPS_PER_PLAN
            )));
        }

        debug!(plan_id = ?plan.plan_id, intent = ?plan.intent, "starting plan execution");
        let mut observations = Vec::with_capacity(plan.steps.len());

        for step in &plan.steps {
            let start = Instant::now();

            let (status, tool_output) = match self
                .tool_registry
                .execute(&step.tool_name, step.tool_input.clone())
                .await
            {
                Ok(output) => (ExecutionStatus::Success, output.data),
                Err(ForecastError::ToolNotFound(name)) => {
                    warn!(step_order = step.order, tool_name = %name, "tool not registered");
                    (
                        ExecutionStatus::Skipped,
                        serde_json::json!({ "error": "Tool not registered" }),
                    )
                }
                Err(e) => {
                    warn!(step_order = step.order, tool_name = %step.tool_name, error = %e, "tool execution failed");
                    (ExecutionStatus::Failed, serde_json::json!({ "error": e.to_string() }))
                }
            };

            observations.push(Observation {
                observation_id: Uuid::new_v4(),
                plan_id: plan.plan_id,
                step_id: step.step_id,
                tool_name: step.tool_name.clone(),
                tool_input: step.tool_input.clone(),
                tool_output,
                execution_time_ms: start.elapsed().as_millis() as u64,
                created_at: Utc::now(),
                status,
            });
        }

        debug!(
            plan_id = ?plan.plan_id,
            observation_count = observations.len(),
            "plan execution completed"
        );
        Ok(observations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::ForecastLedger;
    use crate::classifier::Intent;
    use crate::forecasting::ForecastService;
    use crate::lake;
    use crate::models::PlanStep;
    use crate::registry::ModelRegistry;
    use crate::tools::create_registry;
    use crate::tools::tests::{panel_record, write_panel};
    use chrono::{Duration, NaiveDate};
    use serde_json::json;

    fn engine() -> ExecutionEngine {
        let lake = lake::temp_lake();
        let start = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
        let records: Vec<_> = (0..6)
            .map(|i| panel_record(start + Duration::weeks(i), "ES", 3.8))
            .collect();
        write_panel(&lake, &records);
        let service = ForecastService::new(lake.clone(), ModelRegistry::new(lake.clone()), ForecastLedger::new());
        ExecutionEngine::new(create_registry(lake, service))
    }

    fn plan(steps: Vec<(&str, serde_json::Value)>) -> Plan {
        Plan {
            plan_id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            intent: Intent::CompareMarkets,
            steps: steps
                .into_iter()
                .zip(1..)
                .map(|((tool, input), order)| PlanStep {
                    step_id: Uuid::new_v4(),
                    order,
                    tool_name: tool.to_string(),
                    tool_input: input,
                    expected_output: String::new(),
                })
                .collect(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_steps_run_independently() {
        let engine = engine();
        let plan = plan(vec![
            ("compare_markets", json!({"countries": ["PT"]})),
            ("compare_markets", json!({"countries": ["ES"]})),
            ("fetch_stock_prices", json!({})),
        ]);
        let observations = engine.execute_plan(&plan).await.unwrap();
        assert_eq!(observations.len(), 3);
        assert_eq!(observations[0].status, ExecutionStatus::Failed);
        assert_eq!(observations[1].status, ExecutionStatus::Success);
        assert_eq!(observations[1].tool_output["markets"][0]["country"], "Spain");
        assert_eq!(observations[2].status, ExecutionStatus::Skipped);
    }

    #[tokio::test]
    async fn test_oversized_plan_rejected() {
        let engine = engine();
        let steps = (0..11).map(|_| ("compare_markets", json!({}))).collect();
        assert!(engine.execute_plan(&plan(steps)).await.is_err());
    }
}
