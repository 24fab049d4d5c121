//! Relay configuration with sensible defaults.
//!
//! [`RelayConfig`] holds everything the relay needs: identity, storage,
//! delivery shaping and the set of [`ModelProfile`]s. It can be built in code
//! with `with_*` methods or loaded from a JSON file where every field is
//! optional:
//!
//! ```json
//! {
//!   "bot_nickname": "gato",
//!   "reply_without_highlight": { "libera": ["#gato-test"] },
//!   "model_profile_id": "local",
//!   "model_profiles": {
//!     "local": {
//!       "inference": { "model": "mistral-7b", "max_tokens": 200 },
//!       "history_token_size": 4096,
//!       "trim_strategy": "subtractive"
//!     }
//!   }
//! }
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::context::{DEFAULT_HISTORY_TOKENS, TokenBudget, TrimStrategy};
use crate::delivery::{DEFAULT_MAX_LINE_LENGTH, DEFAULT_TYPING_SUFFIX};
use crate::error::{RelayError, Result};
use crate::history::DEFAULT_MAX_HISTORY_LINES;
use crate::{ChatMessage, ChatRequest, DEFAULT_MODEL};

/// Identifier of the profile that exists out of the box.
pub const DEFAULT_PROFILE_ID: &str = "default";

/// Sampling parameters sent with every completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceParams {
    /// Default: `"gpt-3.5-turbo"`.
    pub model: String,
    pub frequency_penalty: f32,
    /// Reply length limit, also reserved out of the history budget.
    /// Default: `300`.
    pub max_tokens: Option<u32>,
    pub presence_penalty: f32,
    pub seed: Option<u64>,
    /// Default: `1.0`.
    pub temperature: f32,
    /// Default: `1.0`.
    pub top_p: f32,
}

impl Default for InferenceParams {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            frequency_penalty: 0.0,
            max_tokens: Some(300),
            presence_penalty: 0.0,
            seed: None,
            temperature: 1.0,
            top_p: 1.0,
        }
    }
}

impl InferenceParams {
    /// Request body for `messages` using these parameters.
    pub fn to_request(&self, messages: Vec<ChatMessage>) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages,
            max_tokens: self.max_tokens,
            temperature: Some(self.temperature),
            top_p: Some(self.top_p),
            frequency_penalty: self.frequency_penalty,
            presence_penalty: self.presence_penalty,
            seed: self.seed,
            ..Default::default()
        }
    }
}

/// A named model setup: which model, how it samples, how much history it
/// sees and how history is trimmed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelProfile {
    pub inference: InferenceParams,
    /// History limit in tokens. Default: `2048`.
    pub history_token_size: usize,
    /// Replaces the default system prompts when non-empty.
    pub system_prompts: Vec<String>,
    pub trim_strategy: TrimStrategy,
}

impl Default for ModelProfile {
    fn default() -> Self {
        Self {
            inference: InferenceParams::default(),
            history_token_size: DEFAULT_HISTORY_TOKENS,
            system_prompts: Vec::new(),
            trim_strategy: TrimStrategy::default(),
        }
    }
}

impl ModelProfile {
    /// `history_token_size − max_tokens`.
    pub fn budget(&self) -> TokenBudget {
        TokenBudget::new(
            self.history_token_size,
            self.inference.max_tokens.unwrap_or(0) as usize,
        )
    }
}

/// Top-level relay settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Own nickname; used for highlight detection and assistant turns.
    pub bot_nickname: String,
    /// Root directory for conversation logs.
    pub data_dir: PathBuf,
    /// Lines replayed per log. Default: `1000`.
    pub max_history_lines: usize,
    pub chat_command_prefix: String,
    pub admin_nicknames: Vec<String>,
    /// Network → sources where every line gets a reply.
    pub reply_without_highlight: HashMap<String, Vec<String>>,
    /// Deliver lines as they stream in instead of once at the end.
    pub streaming_lines: bool,
    pub typing_suffix: String,
    pub strip_unfinished_sentences: bool,
    pub max_line_length: usize,
    pub default_system_prompts: Vec<String>,
    pub model_profile_id: String,
    pub model_profiles: HashMap<String, ModelProfile>,
    /// Scheduler tick interval. Default: `100`.
    pub tick_interval_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bot_nickname: "chatrelay".to_string(),
            data_dir: PathBuf::from("data/history"),
            max_history_lines: DEFAULT_MAX_HISTORY_LINES,
            chat_command_prefix: "!".to_string(),
            admin_nicknames: Vec::new(),
            reply_without_highlight: HashMap::new(),
            streaming_lines: true,
            typing_suffix: DEFAULT_TYPING_SUFFIX.to_string(),
            strip_unfinished_sentences: true,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            default_system_prompts: vec!["You are an IRC chat bot".to_string()],
            model_profile_id: DEFAULT_PROFILE_ID.to_string(),
            model_profiles: HashMap::from([(
                DEFAULT_PROFILE_ID.to_string(),
                ModelProfile::default(),
            )]),
            tick_interval_ms: 100,
        }
    }
}

impl RelayConfig {
    /// Load settings from a JSON file. Missing fields keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| RelayError::Config(format!("failed to read {}: {e}", path.display())))?;
        let config: Self = serde_json::from_str(&data)
            .map_err(|e| RelayError::Config(format!("failed to parse {}: {e}", path.display())))?;
        config.validate()?;
        debug!(
            "Loaded config from {} ({} profile(s))",
            path.display(),
            config.model_profiles.len()
        );
        Ok(config)
    }

    /// Reject settings the relay cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.bot_nickname.trim().is_empty() {
            return Err(RelayError::Config("bot_nickname must not be empty".into()));
        }
        if self.max_line_length == 0 {
            return Err(RelayError::Config("max_line_length must be positive".into()));
        }
        if self.tick_interval_ms == 0 {
            return Err(RelayError::Config("tick_interval_ms must be positive".into()));
        }
        self.active_profile().map(|_| ())
    }

    pub fn profile(&self, id: &str) -> Option<&ModelProfile> {
        self.model_profiles.get(id)
    }

    /// The profile named by `model_profile_id`.
    pub fn active_profile(&self) -> Result<&ModelProfile> {
        self.profile(&self.model_profile_id).ok_or_else(|| {
            RelayError::Config(format!("unknown model profile: {}", self.model_profile_id))
        })
    }

    /// Make `id` the active profile. Fails if no such profile exists.
    pub fn set_active_profile(&mut self, id: &str) -> Result<()> {
        if !self.model_profiles.contains_key(id) {
            return Err(RelayError::Config(format!("unknown model profile: {id}")));
        }
        self.model_profile_id = id.to_string();
        Ok(())
    }

    /// Profile system prompts if it has any, otherwise the defaults.
    pub fn system_prompts_for(&self, profile: &ModelProfile) -> Vec<String> {
        if profile.system_prompts.is_empty() {
            self.default_system_prompts.clone()
        } else {
            profile.system_prompts.clone()
        }
    }

    /// Whether every line in `source` on `network` is eligible for a reply.
    pub fn replies_without_highlight(&self, network: &str, source: &str) -> bool {
        self.reply_without_highlight
            .get(network)
            .is_some_and(|sources| sources.iter().any(|s| s.eq_ignore_ascii_case(source)))
    }

    pub fn is_admin(&self, nickname: &str) -> bool {
        self.admin_nicknames
            .iter()
            .any(|n| n.eq_ignore_ascii_case(nickname))
    }

    pub fn with_bot_nickname(mut self, nickname: impl Into<String>) -> Self {
        self.bot_nickname = nickname.into();
        self
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    pub fn with_max_history_lines(mut self, lines: usize) -> Self {
        self.max_history_lines = lines;
        self
    }

    pub fn with_admin(mut self, nickname: impl Into<String>) -> Self {
        self.admin_nicknames.push(nickname.into());
        self
    }

    pub fn with_reply_without_highlight(
        mut self,
        network: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        self.reply_without_highlight
            .entry(network.into())
            .or_default()
            .push(source.into());
        self
    }

    pub fn with_streaming_lines(mut self, streaming: bool) -> Self {
        self.streaming_lines = streaming;
        self
    }

    pub fn with_strip_unfinished_sentences(mut self, strip: bool) -> Self {
        self.strip_unfinished_sentences = strip;
        self
    }

    pub fn with_max_line_length(mut self, max: usize) -> Self {
        self.max_line_length = max;
        self
    }

    pub fn with_typing_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.typing_suffix = suffix.into();
        self
    }

    /// Add or replace a profile.
    pub fn with_profile(mut self, id: impl Into<String>, profile: ModelProfile) -> Self {
        self.model_profiles.insert(id.into(), profile);
        self
    }

    pub fn with_model_profile_id(mut self, id: impl Into<String>) -> Self {
        self.model_profile_id = id.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = RelayConfig::default();
        assert_eq!(config.chat_command_prefix, "!");
        assert_eq!(config.max_history_lines, 1000);
        assert_eq!(config.max_line_length, 350);
        assert!(config.streaming_lines);
        assert!(config.strip_unfinished_sentences);
        assert_eq!(config.typing_suffix, " ...🖉");
        assert_eq!(config.default_system_prompts, vec!["You are an IRC chat bot"]);

        let profile = config.active_profile().unwrap();
        assert_eq!(profile.inference.model, "gpt-3.5-turbo");
        assert_eq!(profile.inference.max_tokens, Some(300));
        assert_eq!(profile.history_token_size, 2048);
        assert_eq!(profile.trim_strategy, TrimStrategy::Additive);
        assert_eq!(profile.budget().available(), 1748);
        config.validate().unwrap();
    }

    #[test]
    fn load_partial_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.json");
        std::fs::write(
            &path,
            r##"{
                "bot_nickname": "gato",
                "reply_without_highlight": {"libera": ["#Gato"]},
                "model_profile_id": "local",
                "model_profiles": {
                    "local": {
                        "inference": {"model": "mistral", "max_tokens": 100},
                        "history_token_size": 4096,
                        "system_prompts": ["Be terse."],
                        "trim_strategy": "subtractive"
                    }
                }
            }"##,
        )
        .unwrap();

        let config = RelayConfig::load(&path).unwrap();
        assert_eq!(config.bot_nickname, "gato");
        assert_eq!(config.max_line_length, 350);
        assert!(config.replies_without_highlight("libera", "#gato"));
        assert!(!config.replies_without_highlight("oftc", "#gato"));

        let profile = config.active_profile().unwrap();
        assert_eq!(profile.inference.model, "mistral");
        assert!((profile.inference.temperature - 1.0).abs() < f32::EPSILON);
        assert_eq!(profile.trim_strategy, TrimStrategy::Subtractive);
        assert_eq!(config.system_prompts_for(profile), vec!["Be terse."]);
    }

    #[test]
    fn unknown_active_profile_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.json");
        std::fs::write(&path, r#"{"model_profile_id": "missing"}"#).unwrap();
        let err = RelayConfig::load(&path).unwrap_err();
        assert!(matches!(err, RelayError::Config(ref m) if m.contains("missing")));
    }

    #[test]
    fn invalid_json_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(RelayConfig::load(&path), Err(RelayError::Config(_))));
        assert!(matches!(
            RelayConfig::load(&dir.path().join("absent.json")),
            Err(RelayError::Config(_))
        ));
    }

    #[test]
    fn switching_profiles() {
        let mut config = RelayConfig::default().with_profile("big", ModelProfile {
            history_token_size: 8192,
            ..Default::default()
        });
        config.set_active_profile("big").unwrap();
        assert_eq!(config.active_profile().unwrap().history_token_size, 8192);
        assert!(config.set_active_profile("nope").is_err());
        assert_eq!(config.model_profile_id, "big");
    }

    #[test]
    fn request_carries_inference_params() {
        let params = InferenceParams {
            seed: Some(42),
            presence_penalty: 0.5,
            ..Default::default()
        };
        let req = params.to_request(vec![ChatMessage::user("hi")]);
        assert_eq!(req.model, "gpt-3.5-turbo");
        assert_eq!(req.max_tokens, Some(300));
        assert_eq!(req.seed, Some(42));
        assert!((req.presence_penalty - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn admin_check_ignores_case() {
        let config = RelayConfig::default().with_admin("Alice");
        assert!(config.is_admin("alice"));
        assert!(!config.is_admin("bob"));
    }
}
