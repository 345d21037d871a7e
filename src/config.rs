//! Loading application configuration (prompts, engine tuning, server settings) from TOML + env.
//!
//! `AppConfig` is built once in `main` and handed to the engine and sources by `Arc`.
//! See `AppConfig`, `Prompts` and `EngineConfig` for the expected schema.

use std::path::PathBuf;

use serde::Deserialize;
use tracing::{error, info, warn};

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const VALID_MODELS: &[&str] = &["gpt-4o", "gpt-4o-mini", "o3-mini"];

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AppConfig {
  #[serde(default)]
  pub prompts: Prompts,
  #[serde(default)]
  pub engine: EngineConfig,
  #[serde(default)]
  pub server: ServerConfig,
  /// Filled from the environment, never from TOML.
  #[serde(skip)]
  pub backend: BackendConfig,
}

/// Tuning for question generation and prefetching.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  /// Upper bound on concurrent prefetch requests. `None` runs one task per distinct answer.
  pub prefetch_concurrency: Option<usize>,
  /// Per-request timeout inside a prefetch batch; a timed-out branch is dropped.
  pub prefetch_timeout_secs: u64,
  /// Review every freshly generated seed question and repair its answer when flagged.
  pub verify_questions: bool,
  /// Optional JSON file backing the seed question cache.
  pub cache_path: Option<PathBuf>,
  /// Number of skills requested per topic.
  pub skill_count: usize,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      prefetch_concurrency: None,
      prefetch_timeout_secs: 30,
      verify_questions: false,
      cache_path: None,
      skill_count: 3,
    }
  }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
  pub port: u16,
  /// Directory for JSON session files. Sessions stay in memory when unset.
  pub sessions_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self { port: 3000, sessions_dir: None }
  }
}

/// Backend selection and credentials, read from the environment only.
#[derive(Clone, Debug, Default)]
pub struct BackendConfig {
  pub mock_mode: bool,
  pub api_key: Option<String>,
  pub base_url: String,
  pub model: String,
}

impl BackendConfig {
  pub fn from_env() -> Self {
    let mock_mode = std::env::var("RECQUE_MOCK_MODE")
      .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
      .unwrap_or(false);
    let api_key = std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.trim().is_empty());
    let base_url = std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".into());
    let model = validate_model(std::env::var("RECQUE_MODEL").ok());
    Self { mock_mode, api_key, base_url, model }
  }

  /// The offline source is used in mock mode or when no API key is present.
  pub fn use_offline_source(&self) -> bool {
    self.mock_mode || self.api_key.is_none()
  }
}

/// Falls back to `DEFAULT_MODEL` for unknown model names.
pub fn validate_model(requested: Option<String>) -> String {
  match requested {
    Some(m) if VALID_MODELS.contains(&m.as_str()) => m,
    Some(m) => {
      warn!(target: "recque_backend", model = %m, default = DEFAULT_MODEL, "Invalid model requested; using default");
      DEFAULT_MODEL.to_string()
    }
    None => DEFAULT_MODEL.to_string(),
  }
}

/// Prompts used by the OpenAI source. Placeholders: `{topic}`, `{skill}`, `{count}`,
/// `{prior_question}`, `{prior_answer}`, `{rules}`, `{question}`, `{answers}`, `{correct}`.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Prompts {
  pub system: String,
  pub question_rules: String,
  pub skillmap_user_template: String,
  pub seed_user_template: String,
  pub remediation_user_template: String,
  pub escalation_user_template: String,
  pub review_user_template: String,
}

impl Default for Prompts {
  fn default() -> Self {
    Self {
      system: "You are a patient tutor who writes multiple choice questions. Respond ONLY with strict JSON.".into(),
      question_rules: "Keep the question under 50 words.\n\
Provide at least two incorrect but plausible and realistic alternative answers.\n\
The alternative answers ideally should target common misconceptions.\n\
Each answer should be no more than 20 words.\n\
Ensure there is exactly one correct answer, verify that it is correct.\n\
Ensure it is not obvious which answer is correct; in terms of being longer or containing more information.\n\
Do not provide a prefix for the index of each alternative answer, such as a number, letter, dash or other characters.".into(),
      skillmap_user_template: "Task:\nGenerate a list of skills for the topic: {topic}.\n\n\
Instructions:\nThe list of skills should contain {count} concepts in a natural progression that are important to understand the topic.\n\
The response should only be the skills and no other additional information.\n\
There is no need to provide an index of skill, such as a number, dash or other characters.\n\
Return JSON {\"skills\": [string]}.".into(),
      seed_user_template: "Task:\nCreate an engaging, insightful and challenging multiple choice question that focuses on this skill: {skill}.\n\n\
Make sure you follow these rules: {rules}\n\
Return JSON {\"question_text\": string, \"correct_answer\": string, \"incorrect_answers\": [string]}.".into(),
      remediation_user_template: "Task:\nGenerate a simpler question about {skill} based on the question that was incorrectly answered: {prior_question}.\n\
The learner answered: {prior_answer}. This was incorrect and shows they do not understand all the concepts.\n\
Try use their misconception and formulate a new related question to help explain the misconception.\n\
Perhaps try to break down the original question into smaller parts that help simplify it.\n\n\
Make sure you follow these rules: {rules}\n\
Return JSON {\"question_text\": string, \"correct_answer\": string, \"incorrect_answers\": [string]}.".into(),
      escalation_user_template: "Task:\nGenerate a new question about {skill} that is a more challenging variation of the previous question.\n\
They answered this correctly: {prior_question}.\n\n\
Make sure you follow these rules: {rules}\n\
Return JSON {\"question_text\": string, \"correct_answer\": string, \"incorrect_answers\": [string]}.".into(),
      review_user_template: "Task:\nYou are given a multiple-choice question, along with possible answers.\n\
Your goal is to determine if the stated correct answer is actually correct.\n\n\
Question:\n{question}\n\nPossible Answers:\n{answers}\n\nStated correct answer:\n{correct}\n\n\
Instructions:\n- Solve the given question step by step.\n- Determine the correct answer.\n\
- If the stated correct answer is wrong, provide the correct answer.\n\
Return JSON {\"valid\": boolean, \"correct_answer\": string}.".into(),
    }
  }
}

impl AppConfig {
  /// Build from RECQUE_CONFIG_PATH (if set) plus environment. Never fails:
  /// unreadable or invalid TOML is logged and defaults are used.
  pub fn from_env() -> Self {
    let mut cfg = load_toml_from_env().unwrap_or_default();
    cfg.backend = BackendConfig::from_env();
    if let Some(port) = std::env::var("PORT").ok().and_then(|p| p.parse::<u16>().ok()) {
      cfg.server.port = port;
    }
    cfg
  }
}

fn load_toml_from_env() -> Option<AppConfig> {
  let path = std::env::var("RECQUE_CONFIG_PATH").ok()?;
  match std::fs::read_to_string(&path) {
    Ok(s) => match parse_config(&s) {
      Ok(cfg) => {
        info!(target: "recque_backend", %path, "Loaded config (TOML)");
        Some(cfg)
      }
      Err(e) => {
        error!(target: "recque_backend", %path, error = %e, "Failed to parse TOML config");
        None
      }
    },
    Err(e) => {
      error!(target: "recque_backend", %path, error = %e, "Failed to read TOML config file");
      None
    }
  }
}

pub fn parse_config(s: &str) -> Result<AppConfig, toml::de::Error> {
  toml::from_str::<AppConfig>(s)
}
