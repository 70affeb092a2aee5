use std::env;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::auth::Token;
use crate::error::{RelayError, Result};
use crate::github::GitHubClient;
use crate::tracker::TrackerClient;

/// Relay configuration.
///
/// Loaded from `cirelay.toml`/`.json`/`.yaml` in the working directory (or
/// an explicit path), with environment-variable overrides for credentials so
/// secrets stay out of checked-in files.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    /// CI tracking server connection
    #[serde(default)]
    pub tracker: TrackerConfig,

    /// Source host connection
    #[serde(default)]
    pub github: GitHubConfig,

    /// Pipeline naming
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Test-result discovery and submission
    #[serde(default)]
    pub tests: TestsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct TrackerConfig {
    /// Tracking server URL
    pub url: Option<String>,

    /// Shared space identifier
    pub shared_space: Option<u64>,

    /// Workspace identifier
    pub workspace: Option<u64>,

    /// API client id
    pub client_id: Option<String>,

    /// API client secret
    pub client_secret: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GitHubConfig {
    /// GitHub API token
    pub token: Option<String>,

    /// GitHub API base URL
    #[serde(default = "default_github_api_url")]
    pub api_url: String,

    /// URL recorded as the CI server location on relayed events
    #[serde(default = "default_github_base_url")]
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PipelineConfig {
    /// Pipeline naming template. Placeholders: `${repository_owner}`,
    /// `${repository_name}`, `${workflow_name}`, `${workflow_file_name}`.
    #[serde(default = "default_name_pattern")]
    pub name_pattern: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct TestsConfig {
    /// Testing framework reported for the executor integration
    pub framework: Option<String>,

    /// Glob pattern for unit test result files inside run artifacts
    pub unit_results_pattern: Option<String>,

    /// Glob pattern for gherkin test result files inside run artifacts
    pub gherkin_results_pattern: Option<String>,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            token: None,
            api_url: default_github_api_url(),
            base_url: default_github_base_url(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            name_pattern: default_name_pattern(),
        }
    }
}

fn default_github_api_url() -> String {
    "https://api.github.com".to_string()
}

fn default_github_base_url() -> String {
    "https://github.com".to_string()
}

fn default_name_pattern() -> String {
    "${repository_owner}/${repository_name}/${workflow_name}".to_string()
}

impl Config {
    /// Load configuration from a file.
    ///
    /// Searches for configuration files in this order:
    /// 1. Specified path
    /// 2. ./cirelay.toml
    /// 3. ./cirelay.json
    /// 4. ./cirelay.yaml
    /// 5. ./cirelay.yml
    ///
    /// Returns default configuration if no file is found.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load_from_path(path);
        }

        let candidates = ["cirelay.toml", "cirelay.json", "cirelay.yaml", "cirelay.yml"];
        for candidate in &candidates {
            let path = Path::new(candidate);
            if path.exists() {
                return Self::load_from_path(path);
            }
        }

        Ok(Self::default())
    }

    fn load_from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;

        let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");

        match extension {
            "toml" => toml::from_str(&contents)
                .map_err(|e| RelayError::Config(format!("{}: {e}", path.display()))),
            "json" => serde_json::from_str(&contents)
                .map_err(|e| RelayError::Config(format!("{}: {e}", path.display()))),
            "yaml" | "yml" => serde_yaml::from_str(&contents)
                .map_err(|e| RelayError::Config(format!("{}: {e}", path.display()))),
            _ => toml::from_str(&contents)
                .or_else(|_| serde_json::from_str(&contents))
                .or_else(|_| serde_yaml::from_str(&contents))
                .map_err(|e: serde_yaml::Error| {
                    RelayError::Config(format!("{}: {e}", path.display()))
                }),
        }
    }

    /// Credentials and connection details may come from the environment,
    /// taking precedence over file values.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(value) = env::var("TRACKER_URL") {
            self.tracker.url = Some(value);
        }
        if let Ok(value) = env::var("TRACKER_SHARED_SPACE") {
            if let Ok(parsed) = value.parse() {
                self.tracker.shared_space = Some(parsed);
            }
        }
        if let Ok(value) = env::var("TRACKER_WORKSPACE") {
            if let Ok(parsed) = value.parse() {
                self.tracker.workspace = Some(parsed);
            }
        }
        if let Ok(value) = env::var("TRACKER_CLIENT_ID") {
            self.tracker.client_id = Some(value);
        }
        if let Ok(value) = env::var("TRACKER_CLIENT_SECRET") {
            self.tracker.client_secret = Some(value);
        }
        if let Ok(value) = env::var("GITHUB_TOKEN") {
            self.github.token = Some(value);
        }
    }

    pub fn tracker_shared_space(&self) -> Result<u64> {
        self.tracker
            .shared_space
            .ok_or_else(|| RelayError::Config("tracker.shared-space is not set".to_string()))
    }

    pub fn tracker_client(&self) -> Result<TrackerClient> {
        let url = self
            .tracker
            .url
            .clone()
            .ok_or_else(|| RelayError::Config("tracker.url is not set".to_string()))?;
        let workspace = self
            .tracker
            .workspace
            .ok_or_else(|| RelayError::Config("tracker.workspace is not set".to_string()))?;
        let client_id = self
            .tracker
            .client_id
            .clone()
            .ok_or_else(|| RelayError::Config("tracker.client-id is not set".to_string()))?;
        let client_secret = self
            .tracker
            .client_secret
            .clone()
            .ok_or_else(|| RelayError::Config("tracker.client-secret is not set".to_string()))?;

        TrackerClient::new(
            url,
            self.tracker_shared_space()?,
            workspace,
            client_id,
            Token::from(client_secret),
        )
    }

    pub fn github_client(&self, owner: &str, repo: &str) -> Result<GitHubClient> {
        GitHubClient::new(
            self.github.api_url.clone(),
            owner.to_string(),
            repo.to_string(),
            self.github.token.as_deref().map(Token::from),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.github.api_url, "https://api.github.com");
        assert_eq!(config.github.base_url, "https://github.com");
        assert_eq!(
            config.pipeline.name_pattern,
            "${repository_owner}/${repository_name}/${workflow_name}"
        );
        assert!(config.tracker.url.is_none());
        assert!(config.tests.unit_results_pattern.is_none());
    }

    #[test]
    fn test_load_toml_config() {
        let mut temp_file = tempfile::NamedTempFile::with_suffix(".toml").unwrap();
        let toml_content = r#"
[tracker]
url = "https://tracker.example.com"
shared-space = 1001
workspace = 1002
client-id = "relay"

[github]
token = "ghp-test-token"
base-url = "https://github.example.com"

[pipeline]
name-pattern = "${workflow_name}"

[tests]
unit-results-pattern = "**/*.xml"
"#;
        write!(temp_file, "{}", toml_content).unwrap();

        let config = Config::load_from_path(temp_file.path()).unwrap();
        assert_eq!(
            config.tracker.url.as_deref(),
            Some("https://tracker.example.com")
        );
        assert_eq!(config.tracker.shared_space, Some(1001));
        assert_eq!(config.tracker.workspace, Some(1002));
        assert_eq!(config.github.token.as_deref(), Some("ghp-test-token"));
        assert_eq!(config.github.base_url, "https://github.example.com");
        assert_eq!(config.pipeline.name_pattern, "${workflow_name}");
        assert_eq!(config.tests.unit_results_pattern.as_deref(), Some("**/*.xml"));
    }

    #[test]
    fn test_load_json_config() {
        let mut temp_file = tempfile::NamedTempFile::with_suffix(".json").unwrap();
        let json_content = r#"{
  "tracker": {
    "url": "https://tracker.json.example.com",
    "client-id": "relay"
  },
  "tests": {
    "framework": "junit"
  }
}"#;
        write!(temp_file, "{}", json_content).unwrap();

        let config = Config::load_from_path(temp_file.path()).unwrap();
        assert_eq!(
            config.tracker.url.as_deref(),
            Some("https://tracker.json.example.com")
        );
        assert_eq!(config.tests.framework.as_deref(), Some("junit"));
    }

    #[test]
    fn test_load_nonexistent_config_falls_back_to_defaults() {
        let config = Config::load(Some(Path::new("nonexistent.toml")));
        assert!(config.is_err());

        let config = Config::load(None).unwrap();
        assert_eq!(config.github.api_url, "https://api.github.com");
    }

    #[test]
    fn test_tracker_client_requires_connection_settings() {
        let config = Config::default();
        assert!(matches!(
            config.tracker_client(),
            Err(RelayError::Config(_))
        ));
    }
}
