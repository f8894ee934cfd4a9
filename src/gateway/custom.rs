use std::time::Duration;

use serde_json::{Value, json};

use super::{GatewayFailure, GatewayRequest, GatewayResponse, client, send};

const TEXT_FIELDS: [&str; 4] = ["text", "response", "output", "content"];

/// Generic REST backends get a flat body and may answer with JSON or plain text.
fn extract_text(body: &str) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => TEXT_FIELDS
            .iter()
            .find_map(|f| map.get(*f).and_then(Value::as_str))
            .map(str::to_string)
            .unwrap_or_else(|| body.to_string()),
        Ok(Value::String(s)) => s,
        _ => body.to_string(),
    }
}

pub(super) async fn invoke(
    req: &GatewayRequest,
    timeout: Duration,
) -> Result<GatewayResponse, GatewayFailure> {
    let Some(url) = req
        .base_url
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    else {
        return Err(GatewayFailure::Configuration(
            "custom REST configuration requires api_base_url".into(),
        ));
    };
    let payload = json!({
        "model": req.model,
        "prompt": req.prompt,
        "parameters": Value::Object(req.parameters.clone()),
    });
    let mut builder = client(url, timeout)?
        .post(url)
        .header("Content-Type", "application/json")
        .json(&payload);
    if let Some(key) = &req.credential {
        builder = builder.bearer_auth(key);
    }
    let body = send(builder, timeout).await?;
    Ok(GatewayResponse {
        text: extract_text(&body),
    })
}
