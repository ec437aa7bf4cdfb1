//! `parley config`: print the effective configuration.

use std::path::Path;

use anyhow::Context;
use parley_infra::config::load_api_key;
use parley_types::config::AppConfig;

use crate::state::load_effective_config;

pub async fn show_config(path: &Path) -> anyhow::Result<()> {
    let config = load_effective_config(path, |key| std::env::var(key).ok()).await?;
    let key_set = load_api_key(&config.llm, |key| std::env::var(key).ok()).is_some();
    print!("{}", render(&config, key_set)?);
    Ok(())
}

/// TOML for `config`, followed by a note on whether the API key variable
/// is set. The key itself is never printed.
pub fn render(config: &AppConfig, api_key_set: bool) -> anyhow::Result<String> {
    let body = toml::to_string_pretty(config).context("Failed to serialize configuration")?;
    let status = if api_key_set { "set" } else { "not set" };
    Ok(format!(
        "{body}\n# api key ({}): {status}\n",
        config.llm.api_key_env
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_sections_and_key_status() {
        let out = render(&AppConfig::default(), false).unwrap();
        assert!(out.contains("[server]"));
        assert!(out.contains("[rate_limit]"));
        assert!(out.contains("port = 8080"));
        assert!(out.ends_with("# api key (OPENAI_API_KEY): not set\n"));
    }

    #[test]
    fn test_rendered_config_parses_back() {
        let mut config = AppConfig::default();
        config.context.target_tokens = 1234;
        let out = render(&config, true).unwrap();
        let parsed: AppConfig = toml::from_str(&out).unwrap();
        assert_eq!(parsed.context.target_tokens, 1234);
    }
}
