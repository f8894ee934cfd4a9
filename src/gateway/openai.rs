use std::time::Duration;

use async_openai::types::CreateChatCompletionResponse;
use serde_json::{Map, Value, json};

use super::{GatewayFailure, GatewayRequest, GatewayResponse, client, endpoint, parse_body, send};

const DEFAULT_BASE_URL: &str = "https://api.openai.com";

fn request_body(req: &GatewayRequest) -> Value {
    let mut body: Map<String, Value> = req.parameters.clone();
    body.insert("model".into(), json!(req.model));
    body.insert(
        "messages".into(),
        json!([{ "role": "user", "content": req.prompt }]),
    );
    body.remove("stream");
    Value::Object(body)
}

fn extract_text(resp: &CreateChatCompletionResponse) -> Option<String> {
    resp.choices.first()?.message.content.clone()
}

pub(super) async fn invoke(
    req: &GatewayRequest,
    timeout: Duration,
) -> Result<GatewayResponse, GatewayFailure> {
    let url = endpoint(req.base_url.as_deref(), DEFAULT_BASE_URL, "/v1/chat/completions");
    let mut builder = client(&url, timeout)?
        .post(&url)
        .header("Content-Type", "application/json")
        .json(&request_body(req));
    if let Some(key) = &req.credential {
        builder = builder.bearer_auth(key);
    }
    let body = send(builder, timeout).await?;
    let resp: CreateChatCompletionResponse = parse_body(&body)?;
    let text = extract_text(&resp)
        .ok_or_else(|| GatewayFailure::Malformed("missing choices[0].message.content".into()))?;
    Ok(GatewayResponse { text })
}
