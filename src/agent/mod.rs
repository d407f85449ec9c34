//! Conversational assistant - implements the chat loop
//!
//! INPUT → CLASSIFY → RESOLVE (session memory) → PLAN → EXECUTE → ANSWER
//!
//! Answers are composed deterministically from tool output. An LLM may
//! rephrase that answer but never supplies numbers of its own.

use crate::classifier::{Intent, IntentClassifier, TurnContext};
use crate::execution::ExecutionEngine;
use crate::gemini::GeminiClient;
use crate::memory::{ConversationHistory, ConversationMessage, SessionMemory};
use crate::models::{ExecutionStatus, Observation};
use crate::planner::{resolve, Planner, RulePlanner};
use crate::tools::ToolRegistry;
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const HELP_TEXT: &str = "I can help with olive oil prices:\n\
- Forecasts: \"What will Italian extra virgin olive oil cost next month?\"\n\
- Market comparisons: \"Compare Spain, Italy and Greece over the last 6 months\"\n\
- Price drivers: \"Why are Spanish prices rising?\"\n\
Follow-ups like \"and Greece?\" reuse the previous question.";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AnswerSource {
    Deterministic,
    Gemini,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatReply {
    pub session_id: Uuid,
    pub intent: Intent,
    pub answer: String,
    pub source: AnswerSource,
    pub context: TurnContext,
    pub observations: Vec<Observation>,
}

fn output_f64(value: &Value, key: &str) -> Option<f64> {
    value.get(key).and_then(Value::as_f64)
}

fn output_str<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or("")
}

fn summarize_forecast(data: &Value) -> String {
    let country = output_str(data, "country");
    let grade = output_str(data, "grade").to_lowercase();
    let lines: Vec<String> = data
        .get("forecasts")
        .and_then(Value::as_array)
        .map(|points| {
            points
                .iter()
                .map(|p| {
                    format!(
                        "{} {} olive oil: ${:.2}/liter for the week of {} (95% CI ${:.2}–${:.2})",
                        country,
                        grade,
                        output_f64(p, "predicted_price_usd_per_liter").unwrap_or(f64::NAN),
                        output_str(p, "date"),
                        output_f64(p, "confidence_interval_lower").unwrap_or(f64::NAN),
                        output_f64(p, "confidence_interval_upper").unwrap_or(f64::NAN),
                    )
                })
                .collect()
        })
        .unwrap_or_default();

    if lines.is_empty() {
        format!("No forecast is available for {} {} olive oil.", country, grade)
    } else {
        lines.join("\n")
    }
}

fn summarize_comparison(data: &Value) -> String {
    let mut out = format!("Over the last {}:", output_str(data, "time_period"));
    if let Some(markets) = data.get("markets").and_then(Value::as_array) {
        for m in markets {
            out.push_str(&format!(
                "\n- {}: ${:.2}/liter (average ${:.2}, {}, {:+.1}%)",
                output_str(m, "country"),
                output_f64(m, "current_price_usd_per_liter").unwrap_or(f64::NAN),
                output_f64(m, "average_price_period").unwrap_or(f64::NAN),
                output_str(m, "trend"),
                output_f64(m, "price_change_percent").unwrap_or(0.0),
            ));
        }
    }
    let insights = data.get("insights").cloned().unwrap_or(Value::Null);
    out.push_str(&format!(
        "\nLowest: {}. Highest: {}. Price spread {:.1}%.",
        output_str(&insights, "lowest_price"),
        output_str(&insights, "highest_price"),
        output_f64(&insights, "price_spread_percent").unwrap_or(0.0),
    ));
    if let Some(missing) = data.get("unavailable").and_then(Value::as_array) {
        let names: Vec<&str> = missing.iter().filter_map(Value::as_str).collect();
        if !names.is_empty() {
            out.push_str(&format!(" No data for {}.", names.join(", ")));
        }
    }
    out
}

fn summarize_drivers(data: &Value) -> String {
    let mut out = format!(
        "{} ({}): {}",
        output_str(data, "country"),
        output_str(data, "time_period"),
        output_str(data, "summary")
    );
    if let Some(drivers) = data.get("key_drivers").and_then(Value::as_array) {
        for d in drivers {
            out.push_str(&format!(
                "\n- {}: {:+.1}% ({} impact)",
                output_str(d, "factor"),
                output_f64(d, "change_percent").unwrap_or(0.0),
                output_str(d, "impact"),
            ));
        }
    }
    out
}

/// Deterministic answer text for one observation.
pub fn summarize_observation(observation: &Observation) -> String {
    let data = &observation.tool_output;
    if observation.status != ExecutionStatus::Success {
        let what = match observation.tool_name.as_str() {
            "get_forecast" => "generate a forecast",
            "compare_markets" => "compare markets",
            "analyze_price_drivers" => "analyze price drivers",
            _ => "answer that",
        };
        return format!(
            "I couldn't {}: {}",
            what,
            data.get("error").and_then(Value::as_str).unwrap_or("unknown error")
        );
    }
    match observation.tool_name.as_str() {
        "get_forecast" => summarize_forecast(data),
        "compare_markets" => summarize_comparison(data),
        "analyze_price_drivers" => summarize_drivers(data),
        other => format!("{} completed successfully.", other),
    }
}

pub fn compose_answer(intent: Intent, observations: &[Observation]) -> String {
    if intent == Intent::Help || observations.is_empty() {
        return HELP_TEXT.to_string();
    }
    observations
        .iter()
        .map(summarize_observation)
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Chat assistant grounded in the forecasting tools
pub struct Assistant {
    planner: Box<dyn Planner>,
    execution_engine: ExecutionEngine,
    memory: SessionMemory,
    llm: Option<GeminiClient>,
}

impl Assistant {
    pub fn new(
        planner: Box<dyn Planner>,
        execution_engine: ExecutionEngine,
        memory: SessionMemory,
        llm: Option<GeminiClient>,
    ) -> Self {
        Self {
            planner,
            execution_engine,
            memory,
            llm,
        }
    }

    /// Rule planner over `tools`; Gemini phrasing when an API key is given.
    pub fn with_tools(tools: ToolRegistry, memory: SessionMemory, gemini_api_key: Option<String>) -> Self {
        let llm = gemini_api_key.and_then(|key| match GeminiClient::new(key) {
            Ok(client) => Some(client),
            Err(e) => {
                warn!(error = %e, "failed to build Gemini client, answers stay deterministic");
                None
            }
        });
        Self::new(Box::new(RulePlanner), ExecutionEngine::new(tools), memory, llm)
    }

    pub fn memory_backend(&self) -> &'static str {
        self.memory.backend_name()
    }

    /// Answer one message. A missing session id starts a new session.
    pub async fn chat(&self, session_id: Option<Uuid>, message: &str) -> Result<ChatReply> {
        let session_id = session_id.unwrap_or_else(Uuid::new_v4);

        let mut history = match self.memory.load(session_id).await {
            Ok(history) => history,
            Err(error) => {
                warn!(error = %error, "session memory load failed, continuing without context");
                ConversationHistory::new(session_id)
            }
        };

        let classification = IntentClassifier::classify(message);
        let turn = resolve(&classification, history.last_context());
        debug!(
            session_id = %session_id,
            classified = ?classification.intent,
            intent = ?turn.intent,
            "turn resolved"
        );

        let plan = self.planner.create_plan(session_id, &turn).await?;
        let observations = self.execution_engine.execute_plan(&plan).await?;

        let draft = compose_answer(turn.intent, &observations);
        let (answer, source) = match (&self.llm, turn.intent) {
            (Some(llm), intent) if intent != Intent::Help => {
                let facts = json!(observations.iter().map(|o| &o.tool_output).collect::<Vec<_>>());
                match llm.rephrase(message, &facts, &draft).await {
                    Ok(text) => (text, AnswerSource::Gemini),
                    Err(e) => {
                        warn!(error = %e, "rephrasing failed, using deterministic answer");
                        (draft, AnswerSource::Deterministic)
                    }
                }
            }
            _ => (draft, AnswerSource::Deterministic),
        };

        history.add_message(ConversationMessage::user(message, turn.clone()));
        history.add_message(ConversationMessage::agent(answer.clone()));
        if let Err(error) = self.memory.save(&mut history).await {
            warn!(error = %error, "session memory save failed, reply still returned");
        }

        info!(
            session_id = %session_id,
            intent = ?turn.intent,
            steps = observations.len(),
            source = ?source,
            "chat answered"
        );

        Ok(ChatReply {
            session_id,
            intent: turn.intent,
            answer,
            source,
            context: turn,
            observations,
        })
    }
}
