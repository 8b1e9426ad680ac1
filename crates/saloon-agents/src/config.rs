//! Runtime configuration for the book writer.
//!
//! ## Precedence (highest to lowest)
//!
//! 1. Environment variable overrides (API keys, base URLs, output dir, concurrency)
//! 2. Values from the TOML file (`--config <path>`, else `saloon.toml` if present)
//! 3. Built-in defaults
//!
//! ## Default roster
//!
//! | Agent   | Role     | Provider  |
//! |---------|----------|-----------|
//! | Zero    | creative | openai    |
//! | Gustave | editor   | openai    |
//! | Camille | reviewer | anthropic |

use std::collections::HashSet;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use saloon_coordination::negotiation::{
    BackoffSchedule, CoordinatorConfig, RetryPolicy, Role, Roster,
};
use serde::{Deserialize, Serialize};

use crate::prompts::persona_for;

/// File picked up when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "saloon.toml";

const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";
const DEFAULT_OPENAI_MODEL: &str = "gpt-4";
const DEFAULT_ANTHROPIC_MODEL: &str = "claude-3-5-sonnet-20241022";
const DEFAULT_MAX_ROUNDS: u32 = 10;
const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Environment-variable names for overrides.
pub const ENV_OPENAI_API_KEY: &str = "OPENAI_API_KEY";
pub const ENV_ANTHROPIC_API_KEY: &str = "ANTHROPIC_API_KEY";
pub const ENV_OPENAI_BASE_URL: &str = "SALOON_OPENAI_BASE_URL";
pub const ENV_ANTHROPIC_BASE_URL: &str = "SALOON_ANTHROPIC_BASE_URL";
pub const ENV_OUTPUT_DIR: &str = "SALOON_OUTPUT_DIR";
pub const ENV_MAX_CONCURRENCY: &str = "SALOON_MAX_CONCURRENCY";

/// Backend an agent talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenAi => write!(f, "openai"),
            Self::Anthropic => write!(f, "anthropic"),
        }
    }
}

/// Connection settings for one provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub base_url: String,
    pub model: String,
    /// Never written back out by `saloon config`.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl ProviderSettings {
    fn with(base_url: &str, model: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            model: model.to_string(),
            api_key: None,
            temperature: 0.7,
            max_tokens: 2048,
        }
    }
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self::with(DEFAULT_OPENAI_BASE_URL, DEFAULT_OPENAI_MODEL)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default = "default_openai")]
    pub openai: ProviderSettings,
    #[serde(default = "default_anthropic")]
    pub anthropic: ProviderSettings,
}

fn default_openai() -> ProviderSettings {
    ProviderSettings::with(DEFAULT_OPENAI_BASE_URL, DEFAULT_OPENAI_MODEL)
}

fn default_anthropic() -> ProviderSettings {
    ProviderSettings::with(DEFAULT_ANTHROPIC_BASE_URL, DEFAULT_ANTHROPIC_MODEL)
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            openai: default_openai(),
            anthropic: default_anthropic(),
        }
    }
}

impl ProvidersConfig {
    pub fn get(&self, kind: ProviderKind) -> &ProviderSettings {
        match kind {
            ProviderKind::OpenAi => &self.openai,
            ProviderKind::Anthropic => &self.anthropic,
        }
    }
}

/// One member of the writing team.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSpec {
    pub name: String,
    pub role: Role,
    pub provider: ProviderKind,
    /// Overrides the provider's default model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl AgentSpec {
    pub fn new(name: &str, role: Role, provider: ProviderKind) -> Self {
        Self {
            name: name.to_string(),
            role,
            provider,
            model: None,
        }
    }
}

fn default_agents() -> Vec<AgentSpec> {
    vec![
        AgentSpec::new("Zero", Role::Creative, ProviderKind::OpenAi),
        AgentSpec::new("Gustave", Role::Editor, ProviderKind::OpenAi),
        AgentSpec::new("Camille", Role::Reviewer, ProviderKind::Anthropic),
    ]
}

/// How consensus is scored once the fast paths decline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JudgeKind {
    #[default]
    Jaccard,
    /// Ask a provider whether the proposals agree.
    Model,
}

/// Knobs forwarded to the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NegotiationConfig {
    pub max_provider_retries: u32,
    pub call_timeout_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_timeout_secs: Option<u64>,
    pub content_retries: u32,
    pub consensus_threshold: f64,
    pub judge: JudgeKind,
    pub judge_provider: ProviderKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forcing_role: Option<Role>,
    pub backoff: BackoffSchedule,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            max_provider_retries: 3,
            call_timeout_secs: 120,
            session_timeout_secs: None,
            content_retries: 1,
            consensus_threshold: 0.8,
            judge: JudgeKind::Jaccard,
            judge_provider: ProviderKind::OpenAi,
            forcing_role: Some(Role::Editor),
            backoff: BackoffSchedule::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TitleConfig {
    pub max_rounds: u32,
}

impl Default for TitleConfig {
    fn default() -> Self {
        Self {
            max_rounds: DEFAULT_MAX_ROUNDS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TocConfig {
    pub max_rounds: u32,
    pub min_chapters: u32,
    pub max_chapters: u32,
}

impl Default for TocConfig {
    fn default() -> Self {
        Self {
            max_rounds: DEFAULT_MAX_ROUNDS,
            min_chapters: 5,
            max_chapters: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SectionConfig {
    pub max_rounds: u32,
    pub min_words: u32,
    pub max_words: u32,
}

impl Default for SectionConfig {
    fn default() -> Self {
        Self {
            max_rounds: DEFAULT_MAX_ROUNDS,
            min_words: 500,
            max_words: 2000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub use_colors: bool,
    pub log_to_file: bool,
    pub log_dir: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            use_colors: true,
            log_to_file: true,
            log_dir: PathBuf::from("logs"),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SaloonConfig {
    pub output_dir: PathBuf,
    /// Provider calls in flight across all sessions.
    pub max_concurrency: usize,
    pub negotiation: NegotiationConfig,
    pub title: TitleConfig,
    pub toc: TocConfig,
    pub section: SectionConfig,
    pub logging: LoggingConfig,
    pub providers: ProvidersConfig,
    #[serde(default = "default_agents")]
    pub agents: Vec<AgentSpec>,
}

impl Default for SaloonConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("books"),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            negotiation: NegotiationConfig::default(),
            title: TitleConfig::default(),
            toc: TocConfig::default(),
            section: SectionConfig::default(),
            logging: LoggingConfig::default(),
            providers: ProvidersConfig::default(),
            agents: default_agents(),
        }
    }
}

impl SaloonConfig {
    /// Load, apply environment overrides and validate.
    ///
    /// An explicit `path` must exist; without one, `saloon.toml` in the
    /// working directory is used when present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };
        config.apply_env(|key| env::var(key).ok());
        config.validate().map_err(anyhow::Error::msg)?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to render configuration")
    }

    /// Overlay environment values. `lookup` is `std::env::var` outside tests.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(key) = non_empty(ENV_OPENAI_API_KEY) {
            self.providers.openai.api_key = Some(key);
        }
        if let Some(key) = non_empty(ENV_ANTHROPIC_API_KEY) {
            self.providers.anthropic.api_key = Some(key);
        }
        if let Some(url) = non_empty(ENV_OPENAI_BASE_URL) {
            self.providers.openai.base_url = url;
        }
        if let Some(url) = non_empty(ENV_ANTHROPIC_BASE_URL) {
            self.providers.anthropic.base_url = url;
        }
        if let Some(dir) = non_empty(ENV_OUTPUT_DIR) {
            self.output_dir = PathBuf::from(dir);
        }
        if let Some(n) = non_empty(ENV_MAX_CONCURRENCY).and_then(|v| v.trim().parse().ok()) {
            self.max_concurrency = n;
        }
    }

    /// Validate the configuration, returning a description of the first problem.
    pub fn validate(&self) -> Result<(), String> {
        if self.title.max_rounds == 0 || self.toc.max_rounds == 0 || self.section.max_rounds == 0 {
            return Err("max_rounds must be greater than zero for every content kind".into());
        }
        if self.max_concurrency == 0 {
            return Err("max_concurrency must be greater than zero".into());
        }
        if self.toc.min_chapters == 0 || self.toc.min_chapters > self.toc.max_chapters {
            return Err(format!(
                "invalid chapter bounds: min {} / max {}",
                self.toc.min_chapters, self.toc.max_chapters
            ));
        }
        if self.section.min_words > self.section.max_words {
            return Err(format!(
                "invalid word bounds: min {} / max {}",
                self.section.min_words, self.section.max_words
            ));
        }
        let threshold = self.negotiation.consensus_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(format!("consensus_threshold {} is outside [0, 1]", threshold));
        }
        if self.negotiation.call_timeout_secs == 0 {
            return Err("call_timeout_secs must be greater than zero".into());
        }
        if self.agents.len() < 2 {
            return Err(format!(
                "at least two agents with distinct roles are required, got {}",
                self.agents.len()
            ));
        }
        let mut roles = HashSet::new();
        for agent in &self.agents {
            if agent.name.trim().is_empty() {
                return Err("agent names must not be empty".into());
            }
            if !roles.insert(agent.role) {
                return Err(format!("role {} is assigned to more than one agent", agent.role));
            }
        }
        Ok(())
    }

    /// Agents selected by name (case-insensitive), or every agent when `names` is empty.
    pub fn select_agents(&self, names: &[String]) -> Result<Vec<AgentSpec>, String> {
        if names.is_empty() {
            return Ok(self.agents.clone());
        }
        names
            .iter()
            .map(|name| {
                self.agents
                    .iter()
                    .find(|a| a.name.eq_ignore_ascii_case(name.trim()))
                    .cloned()
                    .ok_or_else(|| format!("unknown agent '{}'", name.trim()))
            })
            .collect()
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        let n = &self.negotiation;
        CoordinatorConfig {
            retry: RetryPolicy::new(n.max_provider_retries, n.backoff.clone()),
            call_timeout: Duration::from_secs(n.call_timeout_secs),
            content_retries: n.content_retries,
            forcing_role: n.forcing_role,
            session_timeout: n.session_timeout_secs.map(Duration::from_secs),
        }
    }
}

/// Roster stamping each role with its agent's name and persona.
pub fn roster_for(agents: &[AgentSpec]) -> Roster {
    agents.iter().fold(Roster::new(), |roster, agent| {
        roster.with(agent.role, persona_for(&agent.name, agent.role).profile(&agent.name))
    })
}

/// Roles in speaking order: creative first, editor last.
pub fn roles_for(agents: &[AgentSpec]) -> Vec<Role> {
    let mut roles: Vec<Role> = agents.iter().map(|a| a.role).collect();
    roles.sort();
    roles.dedup();
    roles
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_limits() {
        let config = SaloonConfig::default();
        assert_eq!(config.title.max_rounds, 10);
        assert_eq!((config.toc.min_chapters, config.toc.max_chapters), (5, 10));
        assert_eq!((config.section.min_words, config.section.max_words), (500, 2000));
        assert_eq!(config.negotiation.consensus_threshold, 0.8);
        assert_eq!(config.negotiation.forcing_role, Some(Role::Editor));
        assert_eq!(config.agents.len(), 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides_file_values() {
        let mut config = SaloonConfig::from_toml(
            r#"
            output_dir = "from-file"
            max_concurrency = 2
            "#,
        )
        .unwrap();
        let env: HashMap<&str, &str> = [
            (ENV_OUTPUT_DIR, "from-env"),
            (ENV_MAX_CONCURRENCY, "7"),
            (ENV_OPENAI_API_KEY, "sk-test"),
            (ENV_ANTHROPIC_BASE_URL, "http://localhost:9000/v1"),
        ]
        .into_iter()
        .collect();
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.output_dir, PathBuf::from("from-env"));
        assert_eq!(config.max_concurrency, 7);
        assert_eq!(config.providers.openai.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.providers.anthropic.base_url, "http://localhost:9000/v1");
        assert!(config.providers.anthropic.api_key.is_none());
    }

    #[test]
    fn test_blank_env_values_ignored() {
        let mut config = SaloonConfig::default();
        config.apply_env(|k| (k == ENV_OPENAI_API_KEY).then(|| "  ".to_string()));
        assert!(config.providers.openai.api_key.is_none());
    }

    #[test]
    fn test_validate_rejects_bad_bounds() {
        let mut config = SaloonConfig::default();
        config.section.min_words = 3000;
        assert!(config.validate().unwrap_err().contains("word bounds"));

        let mut config = SaloonConfig::default();
        config.toc.max_rounds = 0;
        assert!(config.validate().is_err());

        let mut config = SaloonConfig::default();
        config.negotiation.consensus_threshold = 1.5;
        assert!(config.validate().unwrap_err().contains("threshold"));

        let mut config = SaloonConfig::default();
        config.max_concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_duplicate_roles() {
        let mut config = SaloonConfig::default();
        config.agents.push(AgentSpec::new("Echo", Role::Editor, ProviderKind::OpenAi));
        assert!(config.validate().unwrap_err().contains("more than one agent"));
    }

    #[test]
    fn test_validate_requires_two_agents() {
        let mut config = SaloonConfig::default();
        config.agents = config.select_agents(&["zero".to_string()]).unwrap();
        assert!(config.validate().unwrap_err().contains("at least two agents"));

        config.agents.clear();
        assert!(config.validate().is_err());

        let mut config = SaloonConfig::default();
        config.agents = config
            .select_agents(&["zero".to_string(), "camille".to_string()])
            .unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_select_agents_by_name() {
        let config = SaloonConfig::default();
        let picked = config
            .select_agents(&["zero".to_string(), "Camille".to_string()])
            .unwrap();
        assert_eq!(picked.len(), 2);
        assert_eq!(picked[1].role, Role::Reviewer);
        assert!(config.select_agents(&["nobody".to_string()]).is_err());
    }

    #[test]
    fn test_roles_in_speaking_order() {
        let roles = roles_for(&SaloonConfig::default().agents);
        assert_eq!(roles, vec![Role::Creative, Role::Reviewer, Role::Editor]);
    }

    #[test]
    fn test_roster_stamps_agent_names() {
        let roster = roster_for(&SaloonConfig::default().agents);
        assert_eq!(roster.profile(Role::Creative).agent_id, "Zero");
        assert_eq!(roster.profile(Role::Editor).agent_id, "Gustave");
        assert!(!roster.profile(Role::Reviewer).persona.is_empty());
    }

    #[test]
    fn test_coordinator_config_mapping() {
        let mut config = SaloonConfig::default();
        config.negotiation.session_timeout_secs = Some(30);
        let cc = config.coordinator_config();
        assert_eq!(cc.retry.max_provider_retries, 3);
        assert_eq!(cc.call_timeout, Duration::from_secs(120));
        assert_eq!(cc.session_timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_toml_render_omits_api_keys() {
        let mut config = SaloonConfig::default();
        config.providers.openai.api_key = Some("sk-secret".into());
        let rendered = config.to_toml().unwrap();
        assert!(!rendered.contains("sk-secret"));
        assert!(rendered.contains("[negotiation]"));
    }
}
