//! External → internal path mapping.
//!
//! Lookup order is fixed: exact literal match, then the longest matching
//! prefix (replacement + remaining suffix), then pass-through. The transformer
//! is immutable after construction, so `transform` is a pure function of its
//! input and the tables.
use std::collections::HashMap;

use crate::config::ServerConfig;

#[derive(Debug, Clone, Default)]
pub struct PathTransformer {
    exact: HashMap<String, String>,
    /// Sorted by descending prefix length so the first hit is the longest.
    prefixes: Vec<(String, String)>,
}

impl PathTransformer {
    pub fn new(
        exact: impl IntoIterator<Item = (String, String)>,
        prefixes: impl IntoIterator<Item = (String, String)>,
    ) -> Self {
        let mut prefixes: Vec<_> = prefixes.into_iter().collect();
        prefixes.sort_by(|(a, _), (b, _)| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

        Self {
            exact: exact.into_iter().collect(),
            prefixes,
        }
    }

    /// Build the tables from configuration. Every service gets its own
    /// `/health` and `/metrics` re-exposed under its route prefix unless the
    /// config already maps those paths.
    pub fn from_config(config: &ServerConfig) -> Self {
        let mut exact = HashMap::new();
        for (name, service) in &config.services {
            let prefix = config.route_prefix_for(name, service);
            let prefix = prefix.trim_end_matches('/');
            exact.insert(format!("{prefix}/health"), "/health".to_string());
            exact.insert(format!("{prefix}/metrics"), "/metrics".to_string());
        }
        exact.extend(config.path_rewrites.exact.clone());

        Self::new(exact, config.path_rewrites.prefix.clone())
    }

    pub fn transform(&self, original_path: &str) -> String {
        if let Some(replacement) = self.exact.get(original_path) {
            return replacement.clone();
        }

        self.prefixes
            .iter()
            .find_map(|(prefix, replacement)| {
                original_path
                    .strip_prefix(prefix.as_str())
                    .map(|suffix| format!("{replacement}{suffix}"))
            })
            .unwrap_or_else(|| original_path.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceConfig;

    fn transformer() -> PathTransformer {
        PathTransformer::new(
            [("/api/v1/auth/health".to_string(), "/health".to_string())],
            [
                ("/api/v1/player".to_string(), "/players".to_string()),
                (
                    "/api/v1/player/inventory".to_string(),
                    "/inventory".to_string(),
                ),
            ],
        )
    }

    #[test]
    fn exact_match_wins() {
        assert_eq!(transformer().transform("/api/v1/auth/health"), "/health");
    }

    #[test]
    fn longest_prefix_wins() {
        let t = transformer();
        assert_eq!(t.transform("/api/v1/player/42"), "/players/42");
        assert_eq!(t.transform("/api/v1/player/inventory/7"), "/inventory/7");
        assert_eq!(t.transform("/api/v1/player"), "/players");
    }

    #[test]
    fn unmatched_paths_pass_through() {
        let t = transformer();
        assert_eq!(t.transform("/api/v1/world/zones"), "/api/v1/world/zones");
        assert_eq!(t.transform("/"), "/");
        assert_eq!(t.transform(""), "");
    }

    #[test]
    fn transform_is_deterministic() {
        let t = transformer();
        for path in ["/api/v1/player/1", "/api/v1/auth/health", "/nothing", "/api/v1/playerx"] {
            assert_eq!(t.transform(path), t.transform(path));
        }
    }

    #[test]
    fn config_reexposes_service_health_and_metrics() {
        let config = ServerConfig::builder()
            .service("guild", ServiceConfig::new("http://guild:8086"))
            .prefix_rewrite("/api/v1/guild", "/guilds")
            .build()
            .unwrap();
        let t = PathTransformer::from_config(&config);

        assert_eq!(t.transform("/api/v1/guild/health"), "/health");
        assert_eq!(t.transform("/api/v1/guild/metrics"), "/metrics");
        assert_eq!(t.transform("/api/v1/guild/9/members"), "/guilds/9/members");
    }
}
