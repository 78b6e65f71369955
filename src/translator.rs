use std::process::Stdio;
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use tokio::io::AsyncWriteExt as _;

use crate::openai;

pub const DEFAULT_GOOGLE_BASE_URL: &str = "https://translate.googleapis.com";

/// A text translation service. The source language is always detected.
#[async_trait]
pub trait TextTranslator: Send + Sync {
    async fn translate(&self, text: &str, target: &str) -> anyhow::Result<String>;
}

/// Primary subtag of a language tag: `zh-CN` -> `zh`.
pub fn target_code(lang: &str) -> &str {
    let lang = lang.trim();
    match lang.split_once('-') {
        Some((primary, _)) => primary,
        None => lang,
    }
}

/// Google's public `translate_a/single` endpoint.
#[derive(Debug, Clone)]
pub struct GoogleTranslator {
    client: reqwest::Client,
    endpoint: String,
}

impl GoogleTranslator {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("build http client")?;
        let base_url = base_url.trim_end_matches('/');
        Ok(Self {
            client,
            endpoint: format!("{base_url}/translate_a/single"),
        })
    }
}

#[async_trait]
impl TextTranslator for GoogleTranslator {
    async fn translate(&self, text: &str, target: &str) -> anyhow::Result<String> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("client", "gtx"),
                ("sl", "auto"),
                ("tl", target),
                ("dt", "t"),
                ("q", text),
            ])
            .send()
            .await
            .with_context(|| format!("GET {}", self.endpoint))?;

        let status = response.status();
        let raw = response.text().await.context("read translation response body")?;
        if !status.is_success() {
            anyhow::bail!("translation service error ({status}): {}", raw.trim());
        }

        let value: serde_json::Value =
            serde_json::from_str(&raw).context("parse translation response")?;
        parse_google_response(&value)
    }
}

/// Joins the translated sentence pieces of a `translate_a/single` reply.
fn parse_google_response(value: &serde_json::Value) -> anyhow::Result<String> {
    let sentences = value
        .get(0)
        .and_then(|v| v.as_array())
        .ok_or_else(|| anyhow::anyhow!("missing sentence array in translation response"))?;

    let text = sentences
        .iter()
        .filter_map(|sentence| sentence.get(0).and_then(|v| v.as_str()))
        .collect::<String>();
    if text.trim().is_empty() {
        anyhow::bail!("translation output is empty");
    }
    Ok(text)
}

/// Pipes text through an external program (stdin -> stdout).
#[derive(Debug, Clone)]
pub struct CommandTranslator {
    pub program: String,
    pub args: Vec<String>,
}

#[async_trait]
impl TextTranslator for CommandTranslator {
    async fn translate(&self, text: &str, target: &str) -> anyhow::Result<String> {
        let mut child = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .env("AUDIOLIVRE_TRANSLATE_TO", target)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("spawn translator command: {}", self.program))?;

        {
            let mut stdin = child.stdin.take().context("open translator stdin")?;
            stdin
                .write_all(text.as_bytes())
                .await
                .context("write translator stdin")?;
        }

        let output = child
            .wait_with_output()
            .await
            .context("wait translator process")?;
        if !output.status.success() {
            anyhow::bail!(
                "translator command failed: {} ({})",
                self.program,
                output.status
            );
        }

        let stdout =
            String::from_utf8(output.stdout).context("translator stdout is not valid UTF-8")?;
        let stdout = stdout.trim_end_matches('\n').to_string();
        if stdout.trim().is_empty() {
            anyhow::bail!("translation output is empty");
        }
        Ok(stdout)
    }
}

/// OpenAI `responses` endpoint used as a plain-text translator.
#[derive(Debug, Clone)]
pub struct OpenAiTranslator {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
}

impl OpenAiTranslator {
    pub fn new(
        base_url: &str,
        api_key: String,
        model: String,
        temperature: f32,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            endpoint: openai::responses_endpoint(base_url),
            api_key,
            model,
            temperature,
        })
    }

    pub fn from_env(base_url: &str, model: String, temperature: f32) -> anyhow::Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY is not set"))?;
        Self::new(base_url, api_key, model, temperature)
    }
}

#[async_trait]
impl TextTranslator for OpenAiTranslator {
    async fn translate(&self, text: &str, target: &str) -> anyhow::Result<String> {
        let instructions = format!(
            "You are a translation engine.\n\
Task: Translate the input text into the language with code `{target}`.\n\
\n\
Hard rules:\n\
- Keep line breaks where they are.\n\
- Do not summarize and do not add commentary.\n\
\n\
Output:\n\
- Output ONLY the translated text.\n"
        );

        openai::responses_text(
            &self.client,
            &self.endpoint,
            &self.api_key,
            &self.model,
            &instructions,
            text,
            self.temperature,
        )
        .await
    }
}
