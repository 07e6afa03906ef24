//! Client for the optional remote text-understanding service.
//!
//! Two wire profiles are supported and chosen once per installation: an
//! OpenAI-style chat completion endpoint and a single-prompt `generate`
//! endpoint. Each has its own fixed response envelope.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum TextServiceError {
    #[error("text service did not answer within {0:?}")]
    Timeout(Duration),
    #[error("text service transport error: {0}")]
    Transport(String),
    #[error("text service returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("text service returned no text")]
    EmptyResponse,
    #[error("text service response could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),
}

impl From<reqwest::Error> for TextServiceError {
    fn from(err: reqwest::Error) -> Self {
        TextServiceError::Transport(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            max_tokens: 512,
        }
    }
}

#[async_trait]
pub trait TextService: Send + Sync {
    /// Free-text generation. Returns cleaned, non-empty text or an error.
    async fn generate(&self, prompt: &str, params: GenerationParams)
        -> Result<String, TextServiceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TransportProfile {
    #[default]
    #[serde(rename = "chat")]
    ChatCompletion,
    #[serde(rename = "prompt")]
    SinglePrompt,
}

impl TransportProfile {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportProfile::ChatCompletion => "chat",
            TransportProfile::SinglePrompt => "prompt",
        }
    }
}

impl fmt::Display for TransportProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chat" | "chat_completion" | "openai" => Ok(TransportProfile::ChatCompletion),
            "prompt" | "single_prompt" | "generate" | "ollama" => Ok(TransportProfile::SinglePrompt),
            other => Err(format!("unknown transport profile: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TextServiceConfig {
    pub profile: TransportProfile,
    /// Full URL of the completion/generate endpoint.
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub system_prompt: Option<String>,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct PromptRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: PromptOptions,
}

#[derive(Debug, Serialize)]
struct PromptOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
pub struct ChatEnvelope {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PromptEnvelope {
    response: Option<String>,
}

/// Response body of either profile, decoded by the configured profile rather
/// than by probing the payload shape.
#[derive(Debug)]
pub enum CompletionEnvelope {
    Chat(ChatEnvelope),
    Prompt(PromptEnvelope),
}

impl CompletionEnvelope {
    pub fn decode(profile: TransportProfile, body: &str) -> Result<Self, TextServiceError> {
        Ok(match profile {
            TransportProfile::ChatCompletion => CompletionEnvelope::Chat(serde_json::from_str(body)?),
            TransportProfile::SinglePrompt => CompletionEnvelope::Prompt(serde_json::from_str(body)?),
        })
    }

    pub fn into_text(self) -> Option<String> {
        let raw = match self {
            CompletionEnvelope::Chat(env) => env.choices.into_iter().next()?.message.content?,
            CompletionEnvelope::Prompt(env) => env.response?,
        };
        let cleaned = clean_model_output(&raw);
        (!cleaned.is_empty()).then_some(cleaned)
    }
}

#[derive(Debug, Clone)]
pub struct HttpTextService {
    http: reqwest::Client,
    config: TextServiceConfig,
}

impl HttpTextService {
    pub fn new(config: TextServiceConfig) -> Result<Self, TextServiceError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent("channel-vacancy-outreach/0.1")
            .build()?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &TextServiceConfig {
        &self.config
    }

    fn request_body(&self, prompt: &str, params: GenerationParams) -> Result<String, TextServiceError> {
        let model = self.config.model.as_str();
        let body = match self.config.profile {
            TransportProfile::ChatCompletion => {
                let mut messages = Vec::with_capacity(2);
                if let Some(system) = self.config.system_prompt.as_deref() {
                    messages.push(WireMessage {
                        role: "system",
                        content: system,
                    });
                }
                messages.push(WireMessage {
                    role: "user",
                    content: prompt,
                });
                serde_json::to_string(&ChatRequest {
                    model,
                    messages,
                    temperature: params.temperature,
                    max_tokens: params.max_tokens,
                })?
            }
            TransportProfile::SinglePrompt => serde_json::to_string(&PromptRequest {
                model,
                prompt,
                stream: false,
                options: PromptOptions {
                    temperature: params.temperature,
                    num_predict: params.max_tokens,
                },
            })?,
        };
        Ok(body)
    }

    async fn send(&self, body: String) -> Result<String, TextServiceError> {
        let mut request = self
            .http
            .post(&self.config.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .body(body);
        if let Some(key) = self.config.api_key.as_deref() {
            request = request.bearer_auth(key);
        }
        let response = request.send().await.map_err(|e| self.classify(e))?;
        let status = response.status();
        let text = response.text().await.map_err(|e| self.classify(e))?;
        if !status.is_success() {
            return Err(TextServiceError::Status {
                status: status.as_u16(),
                body: truncate_chars(&text, 200).to_string(),
            });
        }
        Ok(text)
    }

    fn classify(&self, err: reqwest::Error) -> TextServiceError {
        if err.is_timeout() {
            TextServiceError::Timeout(self.config.timeout)
        } else {
            TextServiceError::from(err)
        }
    }
}

#[async_trait]
impl TextService for HttpTextService {
    async fn generate(
        &self,
        prompt: &str,
        params: GenerationParams,
    ) -> Result<String, TextServiceError> {
        let body = self.request_body(prompt, params)?;
        debug!(
            profile = %self.config.profile,
            model = %self.config.model,
            prompt_chars = prompt.chars().count(),
            "text service request"
        );
        let raw = tokio::time::timeout(self.config.timeout, self.send(body))
            .await
            .map_err(|_| TextServiceError::Timeout(self.config.timeout))??;
        CompletionEnvelope::decode(self.config.profile, &raw)?
            .into_text()
            .ok_or(TextServiceError::EmptyResponse)
    }
}

/// Strip code fences and one layer of surrounding quotes from model output.
pub fn clean_model_output(raw: &str) -> String {
    let mut text = raw.trim();
    if let Some(rest) = text.strip_prefix("```") {
        let rest = rest.strip_suffix("```").unwrap_or(rest);
        // Drop an info string such as `json` on the opening fence line.
        text = match rest.split_once('\n') {
            Some((info, body)) if is_info_string(info.trim()) => body,
            _ => rest,
        };
        text = text.trim();
    }
    for (open, close) in [('"', '"'), ('\'', '\''), ('«', '»'), ('“', '”')] {
        if text.chars().count() >= 2 && text.starts_with(open) && text.ends_with(close) {
            text = &text[open.len_utf8()..text.len() - close.len_utf8()];
            break;
        }
    }
    text.trim().to_string()
}

fn is_info_string(line: &str) -> bool {
    line.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '+' | '-'))
}

/// Prefix of `text` holding at most `max_chars` characters.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn envelopes_decode_by_profile() {
        let chat = r#"{"choices":[{"message":{"role":"assistant","content":"```json\n{\"a\":1}\n```"}}]}"#;
        let text = CompletionEnvelope::decode(TransportProfile::ChatCompletion, chat)
            .unwrap()
            .into_text();
        assert_eq!(text.as_deref(), Some("{\"a\":1}"));

        let prompt = r#"{"model":"m","response":"  \"Здравствуйте!\"  ","done":true}"#;
        let text = CompletionEnvelope::decode(TransportProfile::SinglePrompt, prompt)
            .unwrap()
            .into_text();
        assert_eq!(text.as_deref(), Some("Здравствуйте!"));

        // A prompt-profile body is not a chat envelope.
        let wrong = CompletionEnvelope::decode(TransportProfile::ChatCompletion, prompt)
            .unwrap()
            .into_text();
        assert_eq!(wrong, None);
        assert!(CompletionEnvelope::decode(TransportProfile::SinglePrompt, "not json").is_err());
    }

    #[test]
    fn cleanup_and_truncation() {
        assert_eq!(clean_model_output("```\nhello\n```"), "hello");
        assert_eq!(
            clean_model_output("```{\"position\":\"SRE\",\n\"company\":\"Acme\"}```"),
            "{\"position\":\"SRE\",\n\"company\":\"Acme\"}"
        );
        assert_eq!(clean_model_output("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(clean_model_output("«Привет»"), "Привет");
        assert_eq!(clean_model_output("plain"), "plain");
        assert_eq!(truncate_chars("Привет мир", 6), "Привет");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }

    #[test]
    fn profiles_parse_from_config_strings() {
        assert_eq!("chat".parse::<TransportProfile>().unwrap(), TransportProfile::ChatCompletion);
        assert_eq!("Ollama".parse::<TransportProfile>().unwrap(), TransportProfile::SinglePrompt);
        assert!("grpc".parse::<TransportProfile>().is_err());
    }

    #[test]
    fn prompt_profile_body_carries_generation_options() {
        let service = HttpTextService::new(TextServiceConfig {
            profile: TransportProfile::SinglePrompt,
            endpoint: "http://127.0.0.1:9/api/generate".into(),
            model: "llama3".into(),
            api_key: None,
            timeout: Duration::from_secs(1),
            system_prompt: None,
        })
        .unwrap();
        let body: serde_json::Value = serde_json::from_str(
            &service
                .request_body("hi", GenerationParams { temperature: 0.5, max_tokens: 64 })
                .unwrap(),
        )
        .unwrap();
        assert_eq!(body["prompt"], "hi");
        assert_eq!(body["stream"], false);
        assert_eq!(body["options"]["num_predict"], 64);
    }

    #[tokio::test]
    async fn silent_endpoint_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let service = HttpTextService::new(TextServiceConfig {
            profile: TransportProfile::ChatCompletion,
            endpoint: format!("http://{addr}/v1/chat/completions"),
            model: "gpt".into(),
            api_key: Some("test-key".into()),
            timeout: Duration::from_millis(200),
            system_prompt: None,
        })
        .unwrap();

        let err = service
            .generate("hello", GenerationParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TextServiceError::Timeout(_)), "{err}");
    }
}
