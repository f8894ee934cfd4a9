use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};

use super::{GatewayFailure, GatewayRequest, GatewayResponse, client, endpoint, parse_body, send};

const DEFAULT_BASE_URL: &str = "http://localhost:11434";

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

fn request_body(req: &GatewayRequest) -> Value {
    json!({
        "model": req.model,
        "prompt": req.prompt,
        "stream": false,
        "options": Value::Object(req.parameters.clone()),
    })
}

pub(super) async fn invoke(
    req: &GatewayRequest,
    timeout: Duration,
) -> Result<GatewayResponse, GatewayFailure> {
    let url = endpoint(req.base_url.as_deref(), DEFAULT_BASE_URL, "/api/generate");
    let mut builder = client(&url, timeout)?
        .post(&url)
        .header("Content-Type", "application/json")
        .json(&request_body(req));
    // 本地部署通常无需密钥，有则带上（反向代理鉴权）
    if let Some(key) = &req.credential {
        builder = builder.bearer_auth(key);
    }
    let body = send(builder, timeout).await?;
    let resp: GenerateResponse = parse_body(&body)?;
    Ok(GatewayResponse {
        text: resp.response,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_config::ProviderKind;
    use serde_json::Map;

    #[test]
    fn parameters_go_under_options() {
        let mut parameters = Map::new();
        parameters.insert("temperature".into(), json!(0.1));
        let req = GatewayRequest {
            kind: ProviderKind::Ollama,
            base_url: None,
            model: "llama3".into(),
            credential: None,
            parameters,
            prompt: "hi".into(),
        };
        let body = request_body(&req);
        assert_eq!(body["stream"], false);
        assert_eq!(body["options"]["temperature"], 0.1);
        assert_eq!(body["prompt"], "hi");
    }
}
