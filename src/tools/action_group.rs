//! Agent action-group envelope
//!
//! Hosted agents call tools with `{actionGroup, function, parameters}` where
//! every parameter value is a string, and expect the tool JSON back as a text
//! body. Failures are reported inside the body, never as transport errors.

use super::ToolRegistry;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionParameter {
    pub name: String,
    #[serde(default)]
    pub r#type: Option<String>,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionGroupRequest {
    #[serde(default)]
    pub action_group: Option<String>,
    #[serde(default)]
    pub function: Option<String>,
    #[serde(default)]
    pub parameters: Vec<ActionParameter>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TextBody {
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseBody {
    #[serde(rename = "TEXT")]
    pub text: TextBody,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FunctionResponse {
    pub response_body: ResponseBody,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActionResponse {
    pub action_group: String,
    pub function: String,
    pub function_response: FunctionResponse,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionGroupResponse {
    pub response: ActionResponse,
}

impl ActionGroupResponse {
    fn new(action_group: String, function: String, body: &Value) -> Self {
        Self {
            response: ActionResponse {
                action_group,
                function,
                function_response: FunctionResponse {
                    response_body: ResponseBody {
                        text: TextBody { body: body.to_string() },
                    },
                },
            },
        }
    }

    /// Decoded JSON body.
    pub fn body(&self) -> Option<Value> {
        serde_json::from_str(&self.response.function_response.response_body.text.body).ok()
    }
}

/// Default action-group name and failure message per function.
fn defaults(function: &str) -> (&'static str, &'static str) {
    match function {
        "compare_markets" => ("market-comparison-tool", "Failed to compare markets"),
        "analyze_price_drivers" => ("price-drivers-tool", "Failed to analyze price drivers"),
        _ => ("forecast-tool", "Failed to generate forecast"),
    }
}

/// Run the requested function and wrap its result in the response envelope.
pub async fn handle_action_group(registry: &ToolRegistry, request: ActionGroupRequest) -> ActionGroupResponse {
    let function = request.function.clone().unwrap_or_else(|| "get_forecast".to_string());
    let (default_group, failure) = defaults(&function);
    let action_group = request
        .action_group
        .clone()
        .unwrap_or_else(|| default_group.to_string());

    let parameters: Map<String, Value> = request
        .parameters
        .into_iter()
        .map(|p| (p.name, Value::String(p.value)))
        .collect();

    info!(action_group = %action_group, function = %function, "action group invoked");
    let body = match registry.execute(&function, Value::Object(parameters)).await {
        Ok(output) => output.data,
        Err(e) => {
            warn!(function = %function, error = %e, "action group call failed");
            json!({ "error": e.to_string(), "message": failure })
        }
    };
    ActionGroupResponse::new(action_group, function, &body)
}
