//! Planner trait and the rule-based planner
//!
//! A plan is the list of tool calls that answers one turn. Planning is
//! deterministic: the classified intent picks the tool and the entities
//! become its parameters.

use crate::classifier::{Classification, Entities, Horizon, Intent, TurnContext};
use crate::models::{Plan, PlanStep};
use crate::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map, Value};
use uuid::Uuid;

/// Settle the intent and entities of a turn. Turns without an intent of
/// their own continue the previous one, and unstated entities carry over
/// when the intent stays the same. A first turn with no intent gets help.
pub fn resolve(classification: &Classification, previous: Option<&TurnContext>) -> TurnContext {
    let mut entities = classification.entities.clone();
    let intent = match (classification.intent, previous) {
        (Some(intent), Some(prev)) => {
            if intent == prev.intent {
                entities.inherit(&prev.entities);
            } else {
                // a new question about the same market keeps the market
                let carried = Entities {
                    countries: prev.entities.countries.clone(),
                    grade: prev.entities.grade,
                    ..Entities::default()
                };
                entities.inherit(&carried);
            }
            intent
        }
        (Some(intent), None) => intent,
        (None, Some(prev)) if prev.intent != Intent::Help => {
            entities.inherit(&prev.entities);
            prev.intent
        }
        (None, _) => Intent::Help,
    };
    TurnContext { intent, entities }
}

/// Trait for plan generation
#[async_trait]
pub trait Planner: Send + Sync {
    async fn create_plan(&self, session_id: Uuid, turn: &TurnContext) -> Result<Plan>;
}

/// Maps each intent to its tool
pub struct RulePlanner;

fn base_parameters(entities: &Entities) -> Map<String, Value> {
    let mut params = Map::new();
    if let Some(grade) = entities.grade {
        params.insert("grade".into(), json!(grade.code()));
    }
    if let Some(period) = &entities.period {
        params.insert("time_period".into(), json!(period));
    }
    params
}

fn step(order: u32, tool_name: &str, tool_input: Map<String, Value>, expected_output: String) -> PlanStep {
    PlanStep {
        step_id: Uuid::new_v4(),
        order,
        tool_name: tool_name.to_string(),
        tool_input: Value::Object(tool_input),
        expected_output,
    }
}

/// One call per mentioned country, or a single call without a country.
fn per_country(entities: &Entities) -> Vec<Option<&String>> {
    if entities.countries.is_empty() {
        vec![None]
    } else {
        entities.countries.iter().map(Some).collect()
    }
}

impl RulePlanner {
    pub fn steps(turn: &TurnContext) -> Vec<PlanStep> {
        let entities = &turn.entities;
        match turn.intent {
            Intent::Help => Vec::new(),
            Intent::Forecast => per_country(entities)
                .into_iter()
                .zip(1..)
                .map(|(country, order)| {
                    let mut params = base_parameters(entities);
                    params.remove("time_period");
                    if let Some(country) = country {
                        params.insert("country".into(), json!(country));
                    }
                    match entities.horizon {
                        Some(Horizon::Weeks(n)) => params.insert("weeks_ahead".into(), json!(n)),
                        Some(Horizon::Months(n)) => params.insert("months_ahead".into(), json!(n)),
                        None => None,
                    };
                    step(order, "get_forecast", params, "Price forecast with 95% interval".into())
                })
                .collect(),
            Intent::CompareMarkets => {
                let mut params = base_parameters(entities);
                if !entities.countries.is_empty() {
                    params.insert("countries".into(), json!(entities.countries));
                }
                vec![step(1, "compare_markets", params, "Market comparison".into())]
            }
            Intent::PriceDrivers => per_country(entities)
                .into_iter()
                .zip(1..)
                .map(|(country, order)| {
                    let mut params = base_parameters(entities);
                    if let Some(country) = country {
                        params.insert("country".into(), json!(country));
                    }
                    step(order, "analyze_price_drivers", params, "Cost driver analysis".into())
                })
                .collect(),
        }
    }
}

#[async_trait]
impl Planner for RulePlanner {
    async fn create_plan(&self, session_id: Uuid, turn: &TurnContext) -> Result<Plan> {
        Ok(Plan {
            plan_id: Uuid::new_v4(),
            session_id,
            intent: turn.intent,
            steps: Self::steps(turn),
            created_at: Utc::now(),
        })
    }
}
