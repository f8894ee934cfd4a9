use std::time::Duration;

use anthropic_ai_sdk::types::message::{ContentBlock, CreateMessageResponse};
use serde_json::{Map, Value, json};

use super::{GatewayFailure, GatewayRequest, GatewayResponse, client, endpoint, parse_body, send};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u64 = 1024;

fn request_body(req: &GatewayRequest) -> Value {
    let mut body: Map<String, Value> = req.parameters.clone();
    body.insert("model".into(), json!(req.model));
    body.insert(
        "messages".into(),
        json!([{ "role": "user", "content": req.prompt }]),
    );
    body.entry("max_tokens").or_insert(json!(DEFAULT_MAX_TOKENS));
    body.remove("stream");
    Value::Object(body)
}

fn extract_text(resp: &CreateMessageResponse) -> Option<String> {
    let text: Vec<&str> = resp
        .content
        .iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect();
    if text.is_empty() {
        None
    } else {
        Some(text.join(""))
    }
}

pub(super) async fn invoke(
    req: &GatewayRequest,
    timeout: Duration,
) -> Result<GatewayResponse, GatewayFailure> {
    let url = endpoint(req.base_url.as_deref(), DEFAULT_BASE_URL, "/v1/messages");
    let mut builder = client(&url, timeout)?
        .post(&url)
        .header("Content-Type", "application/json")
        .header("anthropic-version", API_VERSION)
        .json(&request_body(req));
    if let Some(key) = &req.credential {
        builder = builder.header("x-api-key", key);
    }
    let body = send(builder, timeout).await?;
    let resp: CreateMessageResponse = parse_body(&body)?;
    let text = extract_text(&resp)
        .ok_or_else(|| GatewayFailure::Malformed("no text blocks in content".into()))?;
    Ok(GatewayResponse { text })
}
