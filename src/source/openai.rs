//! OpenAI-backed question source.
//!
//! Only chat.completions with a strict JSON object response is used. Calls are
//! instrumented and log model names, latencies and token usage (not contents).
//!
//! NOTE: We never log the API key. There is no fallback to offline content on
//! failure; errors surface as `GenerationError` so the caller can retry.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};

use super::QuestionSource;
use crate::config::AppConfig;
use crate::domain::{GenerationMode, GenerationRequest, Question, Review, Skillmap};
use crate::error::{GenerationError, GenerationResult};
use crate::util::{fill_template, trunc_for_log};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct OpenAiSource {
  client: reqwest::Client,
  api_key: String,
  pub base_url: String,
  pub model: String,
  cfg: Arc<AppConfig>,
}

impl OpenAiSource {
  /// Construct the client if the config carries an API key; otherwise return None.
  pub fn from_config(cfg: Arc<AppConfig>) -> Option<Self> {
    let api_key = cfg.backend.api_key.clone()?;
    let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build().ok()?;
    Some(Self {
      client,
      api_key,
      base_url: cfg.backend.base_url.trim_end_matches('/').to_string(),
      model: cfg.backend.model.clone(),
      cfg,
    })
  }

  /// JSON-object chat completion. Generic over the target type T.
  #[instrument(level = "info", skip(self, user), fields(model = %self.model))]
  async fn chat_json<T: for<'a> Deserialize<'a>>(&self, user: &str, temperature: f32) -> GenerationResult<T> {
    let url = format!("{}/chat/completions", self.base_url);
    let req = ChatCompletionRequest {
      model: self.model.clone(),
      messages: vec![
        ChatMessageReq { role: "system".into(), content: self.cfg.prompts.system.clone() },
        ChatMessageReq { role: "user".into(), content: user.into() },
      ],
      temperature,
      response_format: Some(ResponseFormat { r#type: "json_object".into() }),
    };

    let start = std::time::Instant::now();
    let res = self
      .client
      .post(&url)
      .header(USER_AGENT, "recque-backend/0.1")
      .header(CONTENT_TYPE, "application/json")
      .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
      .json(&req)
      .send()
      .await
      .map_err(|e| {
        if e.is_timeout() {
          GenerationError::Timeout(REQUEST_TIMEOUT.as_secs())
        } else {
          GenerationError::Transport(e.to_string())
        }
      })?;

    if !res.status().is_success() {
      let status = res.status();
      let body = res.text().await.unwrap_or_default();
      let message = extract_openai_error(&body).unwrap_or(body);
      error!(target: "engine", status = status.as_u16(), elapsed = ?start.elapsed(), "OpenAI call failed");
      return Err(GenerationError::Http { status: status.as_u16(), message });
    }

    let body: ChatCompletionResponse =
      res.json().await.map_err(|e| GenerationError::Malformed(e.to_string()))?;
    if let Some(usage) = &body.usage {
      info!(target: "engine", prompt_tokens = ?usage.prompt_tokens, completion_tokens = ?usage.completion_tokens, total_tokens = ?usage.total_tokens, elapsed = ?start.elapsed(), "OpenAI usage");
    }
    let text = body
      .choices
      .first()
      .and_then(|c| c.message.content.clone())
      .ok_or_else(|| GenerationError::Malformed("response had no message content".into()))?;

    serde_json::from_str::<T>(&text).map_err(|e| {
      GenerationError::Malformed(format!("JSON parse error: {e}; body: {}", trunc_for_log(&text, 120)))
    })
  }

  fn question_prompt(&self, request: &GenerationRequest) -> GenerationResult<String> {
    let prompts = &self.cfg.prompts;
    let prior_question = request.prior_question.as_deref().unwrap_or_default();
    let prior_answer = request.prior_answer.as_deref().unwrap_or_default();
    let template = match request.mode {
      GenerationMode::Seed => &prompts.seed_user_template,
      GenerationMode::Remediation => {
        if request.prior_question.is_none() || request.prior_answer.is_none() {
          return Err(GenerationError::Unsupported(
            "remediation needs both prior_question and prior_answer".into(),
          ));
        }
        &prompts.remediation_user_template
      }
      GenerationMode::Escalation => &prompts.escalation_user_template,
    };
    Ok(fill_template(
      template,
      &[
        ("skill", request.skill.as_str()),
        ("prior_question", prior_question),
        ("prior_answer", prior_answer),
        ("rules", prompts.question_rules.as_str()),
      ],
    ))
  }
}

#[async_trait]
impl QuestionSource for OpenAiSource {
  fn name(&self) -> &str {
    "openai"
  }

  #[instrument(level = "info", skip(self), fields(model = %self.model))]
  async fn skillmap(&self, topic: &str) -> GenerationResult<Vec<String>> {
    let count = self.cfg.engine.skill_count.to_string();
    let user = fill_template(&self.cfg.prompts.skillmap_user_template, &[("topic", topic), ("count", count.as_str())]);
    let map: Skillmap = self.chat_json(&user, 0.7).await?;
    let skills: Vec<String> = map
      .skills
      .into_iter()
      .map(|s| s.trim().to_string())
      .filter(|s| !s.is_empty())
      .collect();
    if skills.is_empty() {
      return Err(GenerationError::Malformed("skillmap contained no skills".into()));
    }
    info!(target: "engine", %topic, skills = skills.len(), "Skillmap generated");
    Ok(skills)
  }

  #[instrument(level = "info", skip(self, request), fields(mode = ?request.mode, skill = %request.skill))]
  async fn generate(&self, request: &GenerationRequest) -> GenerationResult<Question> {
    let user = self.question_prompt(request)?;
    let temperature = match request.mode {
      GenerationMode::Seed | GenerationMode::Escalation => 0.9,
      GenerationMode::Remediation => 0.6,
    };
    let question: Question = self.chat_json(&user, temperature).await?;
    info!(
      target: "engine",
      preview = %trunc_for_log(&question.question_text, 40),
      answers = question.incorrect_answers.len() + 1,
      "Question generated"
    );
    Ok(question)
  }

  #[instrument(level = "info", skip(self, question), fields(text_len = question.question_text.len()))]
  async fn review(&self, question: &Question) -> GenerationResult<Review> {
    let answers = question.all_answers().join("\n");
    let user = fill_template(
      &self.cfg.prompts.review_user_template,
      &[
        ("question", question.question_text.as_str()),
        ("answers", answers.as_str()),
        ("correct", question.correct_answer.as_str()),
      ],
    );
    self.chat_json::<Review>(&user, 0.0).await
  }
}

// --- Chat DTOs ---

#[derive(Serialize)]
struct ChatCompletionRequest {
  model: String,
  messages: Vec<ChatMessageReq>,
  temperature: f32,
  #[serde(skip_serializing_if = "Option::is_none")]
  response_format: Option<ResponseFormat>,
}
#[derive(Serialize)]
struct ChatMessageReq { role: String, content: String }
#[derive(Serialize)]
struct ResponseFormat { #[serde(rename = "type")] r#type: String }

#[derive(Deserialize)]
struct ChatCompletionResponse {
  choices: Vec<ChatChoice>,
  #[serde(default)] usage: Option<Usage>,
}
#[derive(Deserialize)]
struct ChatChoice { message: ChatMessageResp }
#[derive(Deserialize)]
struct ChatMessageResp { content: Option<String> }
#[derive(Deserialize)]
struct Usage {
  #[serde(default)] prompt_tokens: Option<u32>,
  #[serde(default)] completion_tokens: Option<u32>,
  #[serde(default)] total_tokens: Option<u32>,
}

/// Try to extract a clean error message from OpenAI error body.
fn extract_openai_error(body: &str) -> Option<String> {
  #[derive(Deserialize)]
  struct EWrap { error: EObj }
  #[derive(Deserialize)]
  struct EObj { message: String }
  serde_json::from_str::<EWrap>(body).ok().map(|w| w.error.message)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::BackendConfig;

  fn source() -> OpenAiSource {
    let mut cfg = AppConfig::default();
    cfg.backend = BackendConfig {
      mock_mode: false,
      api_key: Some("test-key".into()),
      base_url: "http://localhost:1/v1/".into(),
      model: "gpt-4o-mini".into(),
    };
    OpenAiSource::from_config(Arc::new(cfg)).expect("source")
  }

  #[test]
  fn requires_api_key() {
    assert!(OpenAiSource::from_config(Arc::new(AppConfig::default())).is_none());
    assert_eq!(source().base_url, "http://localhost:1/v1");
  }

  #[test]
  fn prompts_carry_the_request_context() {
    let src = source();
    let req = GenerationRequest::from_parts("Math. Fractions", Some("What is 1/2 + 1/4?"), Some("2/6"), false);
    let prompt = src.question_prompt(&req).expect("prompt");
    assert!(prompt.contains("simpler question about Math. Fractions"));
    assert!(prompt.contains("What is 1/2 + 1/4?"));
    assert!(prompt.contains("The learner answered: 2/6"));

    let esc = GenerationRequest::from_parts("Math. Fractions", Some("What is 1/2 + 1/4?"), None, true);
    assert!(src.question_prompt(&esc).expect("prompt").contains("more challenging variation"));
  }

  #[test]
  fn remediation_without_answer_is_rejected() {
    let req = GenerationRequest {
      mode: GenerationMode::Remediation,
      skill: "s".into(),
      prior_question: Some("q".into()),
      prior_answer: None,
    };
    assert!(matches!(source().question_prompt(&req), Err(GenerationError::Unsupported(_))));
  }

  #[test]
  fn error_bodies_are_unwrapped() {
    let body = r#"{"error": {"message": "Rate limit reached", "type": "requests"}}"#;
    assert_eq!(extract_openai_error(body).as_deref(), Some("Rate limit reached"));
    assert!(extract_openai_error("<html>").is_none());
  }

  #[tokio::test]
  async fn unreachable_backend_is_a_generation_error() {
    let err = source().skillmap("math").await.expect_err("no server");
    assert!(matches!(err, GenerationError::Transport(_) | GenerationError::Timeout(_)));
  }
}
