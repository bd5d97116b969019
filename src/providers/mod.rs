pub mod caching;
pub mod page;
pub mod parser;
pub mod util;
pub mod yahoo_finance;

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;

use crate::core::config::{AppConfig, ProviderSettings};
use crate::core::quote::QuoteProvider;
use crate::core::registry::SourceRegistry;
use caching::CachingQuoteProvider;
use page::HttpPageProvider;
use yahoo_finance::YahooQuoteProvider;

pub fn build_provider(
    settings: &ProviderSettings,
    cache_ttl: Option<Duration>,
) -> Result<Arc<dyn QuoteProvider>> {
    let provider: Arc<dyn QuoteProvider> = match settings {
        ProviderSettings::Yahoo { base_url } => Arc::new(YahooQuoteProvider::new(base_url)?),
        ProviderSettings::Page { url, parsers } => {
            Arc::new(HttpPageProvider::from_specs(url, parsers)?)
        }
    };

    Ok(match cache_ttl {
        Some(ttl) => Arc::new(CachingQuoteProvider::new(provider, ttl)),
        None => provider,
    })
}

/// Builds the source registry described by the `sources` section.
pub fn build_registry(config: &AppConfig) -> Result<SourceRegistry> {
    let cache_ttl = config.cache_ttl_secs.map(Duration::from_secs);
    let mut registry = SourceRegistry::new();
    for settings in &config.sources {
        let provider = build_provider(&settings.provider, cache_ttl)
            .with_context(|| format!("Failed to set up source '{}'", settings.source.name))?;
        registry.register(settings.source.clone(), provider)?;
    }
    Ok(registry)
}

/// The Yahoo provider of the highest-priority enabled Yahoo source; used for
/// daily close history.
pub fn history_provider(config: &AppConfig) -> Result<YahooQuoteProvider> {
    let base_url = config
        .sources
        .iter()
        .filter(|s| s.source.enabled)
        .filter_map(|s| match &s.provider {
            ProviderSettings::Yahoo { base_url } => Some((s.source.priority, base_url)),
            ProviderSettings::Page { .. } => None,
        })
        .min_by_key(|(priority, _)| *priority)
        .map(|(_, base_url)| base_url)
        .context("No enabled Yahoo source configured for price history")?;
    YahooQuoteProvider::new(base_url)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
sources:
  - name: scraper
    priority: 1
    provider:
      kind: page
      url: "http://localhost/quote/{ticker}"
      parsers: [{ kind: regex, pattern: 'px=([0-9.]+)' }]
  - name: yahoo-disabled
    priority: 2
    enabled: false
    provider: { kind: yahoo, base_url: "http://disabled" }
  - name: yahoo
    priority: 3
    provider: { kind: yahoo, base_url: "http://enabled" }
cache_ttl_secs: 10
"#;

    #[test]
    fn test_build_registry_from_config() {
        let config: AppConfig = serde_yaml::from_str(CONFIG).unwrap();
        let registry = build_registry(&config).unwrap();
        assert_eq!(registry.len(), 3);

        let enabled: Vec<_> = registry
            .enabled_sources()
            .iter()
            .map(|s| s.name().to_string())
            .collect();
        assert_eq!(enabled, vec!["scraper", "yahoo"]);
    }

    #[test]
    fn test_build_registry_rejects_bad_parser() {
        let config: AppConfig = serde_yaml::from_str(
            r#"
sources:
  - name: scraper
    priority: 1
    provider:
      kind: page
      url: "http://localhost/quote/{ticker}"
      parsers: [{ kind: regex, pattern: '(' }]
"#,
        )
        .unwrap();
        let err = build_registry(&config).unwrap_err();
        assert!(err.to_string().contains("scraper"));
    }

    #[test]
    fn test_history_provider_requires_enabled_yahoo() {
        let config: AppConfig = serde_yaml::from_str(CONFIG).unwrap();
        assert!(history_provider(&config).is_ok());

        let mut only_pages = config.clone();
        only_pages
            .sources
            .retain(|s| matches!(s.provider, ProviderSettings::Page { .. }));
        assert!(history_provider(&only_pages).is_err());
    }
}
