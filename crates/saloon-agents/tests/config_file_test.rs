//! Layered configuration: TOML file, then environment overrides.

use std::collections::HashMap;
use std::fs;

use saloon_agents::config::{
    roles_for, JudgeKind, ProviderKind, SaloonConfig, ENV_ANTHROPIC_API_KEY, ENV_MAX_CONCURRENCY,
    ENV_OUTPUT_DIR,
};
use saloon_coordination::negotiation::{BackoffSchedule, Role};

const SALOON_TOML: &str = r#"
output_dir = "out/books"
max_concurrency = 2

[negotiation]
max_provider_retries = 5
consensus_threshold = 0.7
judge = "model"
judge_provider = "anthropic"

[negotiation.backoff]
kind = "fixed"
delays_ms = [100, 200, 400]

[section]
min_words = 200
max_words = 800

[[agents]]
name = "Zero"
role = "creative"
provider = "openai"

[[agents]]
name = "Camille"
role = "editor"
provider = "anthropic"
model = "claude-3-opus-20240229"
"#;

#[test]
fn test_load_file_with_overrides() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("saloon.toml");
    fs::write(&path, SALOON_TOML).unwrap();

    let mut config = SaloonConfig::from_file(&path).unwrap();
    assert_eq!(config.max_concurrency, 2);
    assert_eq!(config.negotiation.max_provider_retries, 5);
    assert_eq!(config.negotiation.judge, JudgeKind::Model);
    assert_eq!(config.negotiation.judge_provider, ProviderKind::Anthropic);
    assert_eq!(
        config.negotiation.backoff,
        BackoffSchedule::Fixed {
            delays_ms: vec![100, 200, 400]
        }
    );
    assert_eq!((config.section.min_words, config.section.max_words), (200, 800));
    // Untouched tables keep their defaults.
    assert_eq!(config.title.max_rounds, 10);
    assert_eq!(roles_for(&config.agents), vec![Role::Creative, Role::Editor]);

    let env: HashMap<&str, &str> = HashMap::from([
        (ENV_ANTHROPIC_API_KEY, "sk-ant-test"),
        (ENV_OUTPUT_DIR, "elsewhere"),
        (ENV_MAX_CONCURRENCY, "8"),
    ]);
    config.apply_env(|key| env.get(key).map(|v| v.to_string()));
    assert_eq!(config.providers.anthropic.api_key.as_deref(), Some("sk-ant-test"));
    assert_eq!(config.output_dir, std::path::PathBuf::from("elsewhere"));
    assert_eq!(config.max_concurrency, 8);
    assert!(config.validate().is_ok());

    let coordinator = config.coordinator_config();
    assert_eq!(coordinator.retry.max_provider_retries, 5);
}

#[test]
fn test_load_rejects_invalid_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    fs::write(&path, "[toc]\nmin_chapters = 12\nmax_chapters = 4\n").unwrap();

    let err = SaloonConfig::load(Some(&path)).unwrap_err();
    assert!(err.to_string().contains("chapter bounds"));
}

#[test]
fn test_missing_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(SaloonConfig::load(Some(&dir.path().join("absent.toml"))).is_err());
}

#[test]
fn test_rendered_config_loads_back() {
    let config = SaloonConfig::default();
    let text = config.to_toml().unwrap();
    assert!(!text.contains("api_key"));
    let restored = SaloonConfig::from_toml(&text).unwrap();
    assert_eq!(restored.agents, config.agents);
    assert_eq!(restored.negotiation.backoff, config.negotiation.backoff);
}
