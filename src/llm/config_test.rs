use super::*;
use std::collections::HashMap;

fn env_from(pairs: &[(&'static str, &'static str)]) -> impl Fn(&str) -> Result<String, std::env::VarError> {
    let map: HashMap<&'static str, &'static str> = pairs.iter().copied().collect();
    move |key: &str| {
        map.get(key)
            .map(|v| (*v).to_string())
            .ok_or(std::env::VarError::NotPresent)
    }
}

#[test]
fn defaults_to_anthropic() {
    let cfg = LlmConfig::from_env_fn(env_from(&[("LLM_API_KEY_ENV", "TEST_KEY"), ("TEST_KEY", "secret")])).unwrap();
    assert_eq!(cfg.provider, LlmProviderKind::Anthropic);
    assert_eq!(cfg.model, "claude-sonnet-4-5-20250929");
    assert_eq!(cfg.openai_base_url, DEFAULT_OPENAI_BASE_URL);
    assert_eq!(cfg.max_tokens, DEFAULT_LLM_MAX_TOKENS);
    assert_eq!(
        cfg.timeouts,
        LlmTimeouts { request_secs: DEFAULT_LLM_REQUEST_TIMEOUT_SECS, connect_secs: DEFAULT_LLM_CONNECT_TIMEOUT_SECS }
    );
    assert_eq!(cfg.api_key, "secret");
}

#[test]
fn parses_openai_overrides() {
    let cfg = LlmConfig::from_env_fn(env_from(&[
        ("LLM_PROVIDER", "openai"),
        ("LLM_API_KEY_ENV", "OPENAI_API_KEY"),
        ("OPENAI_API_KEY", "sk-test"),
        ("LLM_OPENAI_BASE_URL", "https://example.test/v1/"),
        ("LLM_REQUEST_TIMEOUT_SECS", "42"),
        ("LLM_CONNECT_TIMEOUT_SECS", "7"),
        ("LLM_MAX_TOKENS", "512"),
    ]))
    .unwrap();
    assert_eq!(cfg.provider, LlmProviderKind::OpenAi);
    assert_eq!(cfg.model, "gpt-4o");
    assert_eq!(cfg.openai_base_url, "https://example.test/v1");
    assert_eq!(cfg.timeouts, LlmTimeouts { request_secs: 42, connect_secs: 7 });
    assert_eq!(cfg.max_tokens, 512);
}

#[test]
fn unknown_provider_errors() {
    let err = LlmConfig::from_env_fn(env_from(&[
        ("LLM_PROVIDER", "bad"),
        ("LLM_API_KEY_ENV", "TEST_KEY"),
        ("TEST_KEY", "secret"),
    ]))
    .unwrap_err()
    .to_string();
    assert!(err.contains("unknown LLM_PROVIDER"));
}

#[test]
fn missing_key_names_the_variable() {
    let err = LlmConfig::from_env_fn(env_from(&[("LLM_API_KEY_ENV", "ANTHROPIC_API_KEY")])).unwrap_err();
    assert!(matches!(err, LlmError::MissingApiKey { var } if var == "ANTHROPIC_API_KEY"));

    let err = LlmConfig::from_env_fn(env_from(&[])).unwrap_err();
    assert!(matches!(err, LlmError::MissingApiKey { var } if var == "LLM_API_KEY_ENV"));
}

#[test]
fn blank_key_counts_as_missing() {
    let err = LlmConfig::from_env_fn(env_from(&[("LLM_API_KEY_ENV", "K"), ("K", "  ")])).unwrap_err();
    assert!(matches!(err, LlmError::MissingApiKey { .. }));
}
