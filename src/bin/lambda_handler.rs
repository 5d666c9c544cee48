//! AWS Lambda handler for running risk model simulations
//!
//! Accepts a model document and run configuration via JSON and returns the
//! loss metrics, control summary, and distribution artifacts.
//!
//! Supports Lambda Function URLs for direct HTTP access.

use aws_lambda_events::event::lambda_function_urls::LambdaFunctionUrlRequest;
use cyber_risk_engine::{FxTable, RiskEngineError, RiskModel, SimulationConfig, SimulationEngine, SimulationResult};
use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Input for a single simulation
#[derive(Debug, Deserialize)]
pub struct SimulationRequest {
    pub model: RiskModel,

    /// Rate table; single-currency USD when absent
    #[serde(default)]
    pub fx: Option<FxTable>,

    /// Run settings (`runs`, `seed`, `quantiles`, ...) at the top level;
    /// engine defaults apply to omitted fields
    #[serde(flatten)]
    pub config: SimulationConfig,
}

#[derive(Debug, Serialize)]
pub struct SimulationResponse {
    #[serde(flatten)]
    pub result: SimulationResult,
    pub execution_time_ms: u64,
}

/// Function URL response envelope
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpResponse {
    pub status_code: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
}

fn cors_headers() -> HashMap<String, String> {
    let mut headers = HashMap::new();
    headers.insert("Content-Type".to_string(), "application/json".to_string());
    headers.insert("Access-Control-Allow-Origin".to_string(), "*".to_string());
    headers.insert("Access-Control-Allow-Methods".to_string(), "POST, OPTIONS".to_string());
    headers.insert("Access-Control-Allow-Headers".to_string(), "Content-Type".to_string());
    headers
}

fn error_response(status: u16, message: &str) -> HttpResponse {
    HttpResponse {
        status_code: status,
        headers: cors_headers(),
        body: serde_json::json!({ "error": message }).to_string(),
    }
}

/// Configuration problems are the caller's fault, everything else is ours
fn status_for(error: &RiskEngineError) -> u16 {
    if error.is_configuration() {
        400
    } else {
        500
    }
}

/// Lambda handler function
async fn handler(event: LambdaEvent<LambdaFunctionUrlRequest>) -> Result<HttpResponse, Error> {
    let start = std::time::Instant::now();
    let request = event.payload;

    // CORS preflight
    if request.request_context.http.method.as_deref() == Some("OPTIONS") {
        return Ok(HttpResponse {
            status_code: 200,
            headers: cors_headers(),
            body: String::new(),
        });
    }

    if request.is_base64_encoded {
        return Ok(error_response(400, "base64-encoded bodies are not supported"));
    }
    let body = request.body.unwrap_or_else(|| "{}".to_string());

    let request: SimulationRequest = match serde_json::from_str(&body) {
        Ok(r) => r,
        Err(e) => return Ok(error_response(400, &format!("Invalid JSON: {}", e))),
    };

    let fx = request.fx.unwrap_or_default();
    let engine = SimulationEngine::new(request.config, fx);
    let result = match engine.simulate(&request.model) {
        Ok(result) => result,
        Err(e) => {
            log::warn!("Simulation of '{}' failed: {}", request.model.name, e);
            return Ok(error_response(status_for(&e), &e.to_string()));
        }
    };

    let response = SimulationResponse {
        result,
        execution_time_ms: start.elapsed().as_millis() as u64,
    };
    match serde_json::to_string(&response) {
        Ok(body) => Ok(HttpResponse {
            status_code: 200,
            headers: cors_headers(),
            body,
        }),
        Err(e) => Ok(error_response(500, &format!("Serialization failed: {}", e))),
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    env_logger::init();
    run(service_fn(handler)).await
}
