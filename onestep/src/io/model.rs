//! Model port and HTTP clients for the supported providers.
//!
//! Clients are synchronous (`reqwest::blocking`), make exactly one request per
//! call and never retry.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::core::types::ModelConfig;
use crate::io::config::Secrets;

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
pub const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const ANTHROPIC_MAX_TOKENS: u32 = 2048;

pub const OPENAI_DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const ANTHROPIC_DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
pub const OPENROUTER_DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Produces the raw text of an action plan for one step.
pub trait ModelClient {
    fn plan_step(&self, config: &ModelConfig, system_prompt: &str, user_prompt: &str)
    -> Result<String>;
}

impl<T: ModelClient + ?Sized> ModelClient for Box<T> {
    fn plan_step(
        &self,
        config: &ModelConfig,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String> {
        (**self).plan_step(config, system_prompt, user_prompt)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAiCompat,
    AnthropicCompat,
    OpenRouterHttp,
}

impl Provider {
    pub fn as_str(self) -> &'static str {
        match self {
            Provider::OpenAiCompat => "openai_compat",
            Provider::AnthropicCompat => "anthropic_compat",
            Provider::OpenRouterHttp => "openrouter_http",
        }
    }

    pub fn api_key_env(self) -> &'static str {
        match self {
            Provider::OpenAiCompat => "OPENAI_API_KEY",
            Provider::AnthropicCompat => "ANTHROPIC_API_KEY",
            Provider::OpenRouterHttp => "OPENROUTER_API_KEY",
        }
    }

    fn secret_name(self) -> &'static str {
        match self {
            Provider::OpenAiCompat => "openai_api_key",
            Provider::AnthropicCompat => "anthropic_api_key",
            Provider::OpenRouterHttp => "openrouter_api_key",
        }
    }

    fn secret(self, secrets: &Secrets) -> Option<&str> {
        match self {
            Provider::OpenAiCompat => secrets.openai_api_key.as_deref(),
            Provider::AnthropicCompat => secrets.anthropic_api_key.as_deref(),
            Provider::OpenRouterHttp => secrets.openrouter_api_key.as_deref(),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "openai_compat" => Ok(Provider::OpenAiCompat),
            "anthropic_compat" => Ok(Provider::AnthropicCompat),
            "openrouter_http" => Ok(Provider::OpenRouterHttp),
            other => Err(anyhow!(
                "unknown model provider: {other} (expected openai_compat, anthropic_compat or openrouter_http)"
            )),
        }
    }
}

/// Wire format used by OpenRouter for a given model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiStyle {
    OpenAi,
    Anthropic,
}

impl ApiStyle {
    /// Anything other than `anthropic` (case-insensitive) is OpenAI style.
    pub fn from_config(api_style: Option<&str>) -> Self {
        match api_style {
            Some(style) if style.trim().eq_ignore_ascii_case("anthropic") => ApiStyle::Anthropic,
            _ => ApiStyle::OpenAi,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    Env,
    LocalConfig,
}

impl fmt::Display for KeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            KeySource::Env => "env",
            KeySource::LocalConfig => "local.toml",
        })
    }
}

/// Find the API key for `provider`: environment first, then `[secrets]`.
pub fn resolve_api_key(provider: Provider, secrets: &Secrets) -> Result<(String, KeySource)> {
    resolve_api_key_with(provider, secrets, |name| std::env::var(name).ok())
}

pub(crate) fn resolve_api_key_with(
    provider: Provider,
    secrets: &Secrets,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<(String, KeySource)> {
    let non_blank = |value: &str| {
        let value = value.trim();
        (!value.is_empty()).then(|| value.to_string())
    };
    if let Some(key) = lookup(provider.api_key_env()).as_deref().and_then(non_blank) {
        return Ok((key, KeySource::Env));
    }
    if let Some(key) = provider.secret(secrets).and_then(non_blank) {
        return Ok((key, KeySource::LocalConfig));
    }
    Err(anyhow!(
        "missing API key for {provider}: set {} or secrets.{} in .onestep/local.toml",
        provider.api_key_env(),
        provider.secret_name()
    ))
}

/// Build the client for `config.provider` with its resolved API key.
pub fn model_client_for(config: &ModelConfig, secrets: &Secrets) -> Result<Box<dyn ModelClient>> {
    let provider: Provider = config.provider.parse()?;
    let (api_key, source) = resolve_api_key(provider, secrets)?;
    debug!(provider = %provider, source = ?source, "resolved API key");
    Ok(match provider {
        Provider::OpenAiCompat => Box::new(OpenAiCompatClient::new(api_key)?),
        Provider::AnthropicCompat => Box::new(AnthropicCompatClient::new(api_key)?),
        Provider::OpenRouterHttp => Box::new(OpenRouterClient::new(api_key)?),
    })
}

/// OpenAI-compatible `/chat/completions` endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiCompatClient {
    http: HttpJson,
    api_key: String,
}

impl OpenAiCompatClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Ok(Self {
            http: HttpJson::new()?,
            api_key: api_key.into(),
        })
    }
}

impl ModelClient for OpenAiCompatClient {
    #[instrument(skip_all, fields(provider = "openai_compat", model = %config.model))]
    fn plan_step(
        &self,
        config: &ModelConfig,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String> {
        let url = format!(
            "{}/chat/completions",
            base_url(config, OPENAI_DEFAULT_BASE_URL)
        );
        let request = ChatCompletionRequest::new(&config.model, system_prompt, user_prompt);
        let body = self.http.post(
            &url,
            &[("Authorization", format!("Bearer {}", self.api_key))],
            &request,
        )?;
        parse_chat_completion(&body)
    }
}

/// Anthropic-compatible `/v1/messages` endpoint.
#[derive(Debug, Clone)]
pub struct AnthropicCompatClient {
    http: HttpJson,
    api_key: String,
}

impl AnthropicCompatClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Ok(Self {
            http: HttpJson::new()?,
            api_key: api_key.into(),
        })
    }
}

impl ModelClient for AnthropicCompatClient {
    #[instrument(skip_all, fields(provider = "anthropic_compat", model = %config.model))]
    fn plan_step(
        &self,
        config: &ModelConfig,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String> {
        let url = format!(
            "{}/v1/messages",
            base_url(config, ANTHROPIC_DEFAULT_BASE_URL)
        );
        let request = MessagesRequest::new(&config.model, system_prompt, user_prompt, Some(0.0));
        let body = self.http.post(&url, &anthropic_headers(&self.api_key), &request)?;
        parse_messages(&body)
    }
}

/// OpenRouter, speaking either OpenAI or Anthropic style per `api_style`.
#[derive(Debug, Clone)]
pub struct OpenRouterClient {
    http: HttpJson,
    api_key: String,
}

impl OpenRouterClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Ok(Self {
            http: HttpJson::new()?,
            api_key: api_key.into(),
        })
    }
}

impl ModelClient for OpenRouterClient {
    #[instrument(skip_all, fields(provider = "openrouter_http", model = %config.model))]
    fn plan_step(
        &self,
        config: &ModelConfig,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String> {
        let base = base_url(config, OPENROUTER_DEFAULT_BASE_URL);
        match ApiStyle::from_config(config.api_style.as_deref()) {
            ApiStyle::OpenAi => {
                let request = ChatCompletionRequest::new(&config.model, system_prompt, user_prompt);
                let body = self.http.post(
                    &format!("{base}/chat/completions"),
                    &[("Authorization", format!("Bearer {}", self.api_key))],
                    &request,
                )?;
                parse_chat_completion(&body)
            }
            ApiStyle::Anthropic => {
                let request = MessagesRequest::new(&config.model, system_prompt, user_prompt, None);
                let body = self.http.post(
                    &format!("{base}/messages"),
                    &anthropic_headers(&self.api_key),
                    &request,
                )?;
                parse_messages(&body)
            }
        }
    }
}

fn base_url<'a>(config: &'a ModelConfig, default: &'a str) -> &'a str {
    config
        .base_url
        .as_deref()
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .unwrap_or(default)
        .trim_end_matches('/')
}

fn anthropic_headers(api_key: &str) -> [(&'static str, String); 2] {
    [
        ("x-api-key", api_key.to_string()),
        ("anthropic-version", ANTHROPIC_VERSION.to_string()),
    ]
}

/// Blocking JSON POST with a fixed timeout.
#[derive(Debug, Clone)]
struct HttpJson {
    client: Client,
}

impl HttpJson {
    fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("build HTTP client")?;
        Ok(Self { client })
    }

    fn post<T: Serialize>(
        &self,
        url: &str,
        headers: &[(&'static str, String)],
        payload: &T,
    ) -> Result<String> {
        let mut request = self.client.post(url).json(payload);
        for (name, value) in headers {
            request = request.header(*name, value);
        }
        let response = request
            .send()
            .with_context(|| format!("request to {url} failed"))?;
        let status = response.status();
        let body = response
            .text()
            .with_context(|| format!("read response body from {url}"))?;
        debug!(status = status.as_u16(), bytes = body.len(), "model response");
        if !status.is_success() {
            return Err(anyhow!(
                "model request failed: status={}, body={}",
                status.as_u16(),
                body
            ));
        }
        Ok(body)
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    temperature: f32,
    response_format: ResponseFormat,
    messages: [ChatMessage<'a>; 2],
}

impl<'a> ChatCompletionRequest<'a> {
    fn new(model: &'a str, system_prompt: &'a str, user_prompt: &'a str) -> Self {
        Self {
            model,
            temperature: 0.0,
            response_format: ResponseFormat {
                kind: "json_object",
            },
            messages: [
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt,
                },
            ],
        }
    }
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    system: &'a str,
    messages: [ChatMessage<'a>; 1],
}

impl<'a> MessagesRequest<'a> {
    fn new(
        model: &'a str,
        system_prompt: &'a str,
        user_prompt: &'a str,
        temperature: Option<f32>,
    ) -> Self {
        Self {
            model,
            max_tokens: ANTHROPIC_MAX_TOKENS,
            temperature,
            system: system_prompt,
            messages: [ChatMessage {
                role: "user",
                content: user_prompt,
            }],
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    text: Option<String>,
}

fn parse_chat_completion(body: &str) -> Result<String> {
    let parsed: ChatCompletionResponse =
        serde_json::from_str(body).context("parse chat completion response")?;
    parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("chat completion response has no choices"))?
        .message
        .content
        .ok_or_else(|| anyhow!("chat completion response missing message content"))
}

fn parse_messages(body: &str) -> Result<String> {
    let parsed: MessagesResponse = serde_json::from_str(body).context("parse messages response")?;
    let first = parsed
        .content
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("messages response missing content"))?;
    first
        .text
        .filter(|text| !text.is_empty())
        .ok_or_else(|| anyhow!("messages response missing text"))
}
