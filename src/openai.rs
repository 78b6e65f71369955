//! Minimal OpenAI HTTP client: the `responses` endpoint for translation and
//! `audio/speech` for synthesis.

use anyhow::Context as _;
use serde_json::{Value, json};

pub fn responses_endpoint(base_url: &str) -> String {
    endpoint(base_url, "responses")
}

pub fn speech_endpoint(base_url: &str) -> String {
    endpoint(base_url, "audio/speech")
}

fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}/{path}", base_url.trim_end_matches('/'))
}

/// Sends one text-only `responses` request and returns the concatenated
/// output text.
pub async fn responses_text(
    client: &reqwest::Client,
    endpoint: &str,
    api_key: &str,
    model: &str,
    instructions: &str,
    input: &str,
    temperature: f32,
) -> anyhow::Result<String> {
    let mut body = json!({
        "model": model,
        "instructions": instructions,
        "input": input,
        "text": { "format": { "type": "text" } },
        "store": false,
    });
    // The gpt-5 family rejects sampling parameters.
    if !model.starts_with("gpt-5") {
        body["temperature"] = json!(temperature);
    }

    let response = post_json(client, endpoint, api_key, &body).await?;
    let raw = response.text().await.context("read OpenAI response body")?;
    let value: Value = serde_json::from_str(&raw).context("parse OpenAI response")?;
    extract_output_text(&value).context("extract output text")
}

/// Starts an `audio/speech` request. The body is left unread so the caller
/// can stream it.
pub async fn speech_response(
    client: &reqwest::Client,
    endpoint: &str,
    api_key: &str,
    model: &str,
    voice: &str,
    input: &str,
    speed: f32,
) -> anyhow::Result<reqwest::Response> {
    let body = json!({
        "model": model,
        "voice": voice,
        "input": input,
        "speed": speed,
        "response_format": "mp3",
    });
    post_json(client, endpoint, api_key, &body).await
}

/// POSTs `body` and fails with the API's own error message on a non-2xx
/// status.
async fn post_json(
    client: &reqwest::Client,
    endpoint: &str,
    api_key: &str,
    body: &Value,
) -> anyhow::Result<reqwest::Response> {
    let response = client
        .post(endpoint)
        .bearer_auth(api_key)
        .json(body)
        .send()
        .await
        .with_context(|| format!("POST {endpoint}"))?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let raw = response.text().await.unwrap_or_default();
    let message = parse_error_message(&raw).unwrap_or(raw);
    anyhow::bail!("OpenAI API error ({status}): {}", message.trim())
}

fn parse_error_message(raw_json: &str) -> Option<String> {
    let value: Value = serde_json::from_str(raw_json).ok()?;
    value
        .pointer("/error/message")?
        .as_str()
        .map(str::to_owned)
}

/// Joins every `output_text` part of every `message` output item.
fn extract_output_text(value: &Value) -> anyhow::Result<String> {
    let output = value
        .get("output")
        .and_then(Value::as_array)
        .context("missing `output` array in response")?;

    let text = output
        .iter()
        .filter(|item| item.get("type").and_then(Value::as_str) == Some("message"))
        .filter_map(|item| item.get("content").and_then(Value::as_array))
        .flatten()
        .filter(|part| part.get("type").and_then(Value::as_str) == Some("output_text"))
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect::<String>();

    if text.trim().is_empty() {
        anyhow::bail!("OpenAI output text is empty");
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_ignore_trailing_slash() {
        assert_eq!(
            responses_endpoint("http://127.0.0.1:9/v1/"),
            "http://127.0.0.1:9/v1/responses"
        );
        assert_eq!(
            speech_endpoint("https://api.openai.com/v1"),
            "https://api.openai.com/v1/audio/speech"
        );
    }

    #[test]
    fn output_text_joins_message_parts() -> anyhow::Result<()> {
        let value = json!({
            "output": [
                { "type": "reasoning" },
                { "type": "message", "content": [
                    { "type": "output_text", "text": "Bonjour" },
                    { "type": "output_text", "text": " le monde" }
                ]}
            ]
        });
        assert_eq!(extract_output_text(&value)?, "Bonjour le monde");
        Ok(())
    }

    #[test]
    fn error_message_is_read_from_error_object() {
        let raw = r#"{"error":{"message":"bad key"}}"#;
        assert_eq!(parse_error_message(raw).as_deref(), Some("bad key"));
        assert_eq!(parse_error_message("not json"), None);
    }
}
