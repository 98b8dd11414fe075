use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use triage_core::{
    ClusterEngine, DecisionPolicy, RiskAssessor, DEFAULT_AUTO_FIX_CONFIDENCE,
    DEFAULT_CHECKOUT_KEYWORDS, DEFAULT_FAILURE_SIGNATURES, DEFAULT_PAYMENT_CATEGORIES,
    DEFAULT_REVENUE_KEYWORDS, DEFAULT_VOLUME_SPIKE_THRESHOLD,
};

/// How many knowledge documents to retrieve per collection.
const DEFAULT_SEARCH_TOP_K: usize = 3;
/// Diagnoser calls get a generous default; local models can be slow.
const DEFAULT_DIAGNOSER_TIMEOUT_SECS: u64 = 300;
/// Knowledge lookups are best-effort and cut off quickly.
const DEFAULT_KB_TIMEOUT_SECS: u64 = 10;

/// Top-level triage service configuration.
#[derive(Debug, Clone)]
pub struct TriageConfig {
    /// OpenAI-compatible chat completions base URL for the diagnoser.
    pub model_url: String,
    /// Model name sent in diagnoser requests.
    pub model_name: String,
    /// Cluster size above which a volume spike is flagged (strictly greater).
    pub volume_spike_threshold: usize,
    /// Confidence a diagnosis must strictly exceed before auto-fix is allowed.
    pub auto_fix_confidence: f64,
    /// Documents retrieved per knowledge collection during search.
    pub search_top_k: usize,
    /// Hard timeout for a single diagnoser call.
    pub diagnoser_timeout_secs: u64,
    /// Hard timeout for a single knowledge store call.
    pub kb_timeout_secs: u64,
    /// Directory for session JSON persistence (None = in-memory only).
    pub state_dir: Option<PathBuf>,
    /// API-failure signatures for abnormal-pattern detection.
    pub failure_signatures: Vec<String>,
    /// Root-cause categories treated as payment/checkout work.
    pub payment_categories: Vec<String>,
    /// Keywords marking a cluster as checkout-impacting.
    pub checkout_keywords: Vec<String>,
    /// Keywords marking a cluster as revenue-impacting.
    pub revenue_keywords: Vec<String>,
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            model_url: std::env::var("TRIAGE_MODEL_URL")
                .unwrap_or_else(|_| "http://localhost:8080/v1".into()),
            model_name: std::env::var("TRIAGE_MODEL_NAME")
                .unwrap_or_else(|_| "qwen2.5-14b-instruct".into()),
            volume_spike_threshold: std::env::var("TRIAGE_VOLUME_SPIKE_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_VOLUME_SPIKE_THRESHOLD),
            auto_fix_confidence: std::env::var("TRIAGE_AUTO_FIX_CONFIDENCE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_AUTO_FIX_CONFIDENCE),
            search_top_k: std::env::var("TRIAGE_SEARCH_TOP_K")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_SEARCH_TOP_K),
            diagnoser_timeout_secs: std::env::var("TRIAGE_DIAGNOSER_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_DIAGNOSER_TIMEOUT_SECS),
            kb_timeout_secs: std::env::var("TRIAGE_KB_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_KB_TIMEOUT_SECS),
            state_dir: std::env::var("TRIAGE_STATE_DIR").ok().map(PathBuf::from),
            failure_signatures: to_owned_list(DEFAULT_FAILURE_SIGNATURES),
            payment_categories: to_owned_list(DEFAULT_PAYMENT_CATEGORIES),
            checkout_keywords: to_owned_list(DEFAULT_CHECKOUT_KEYWORDS),
            revenue_keywords: to_owned_list(DEFAULT_REVENUE_KEYWORDS),
        }
    }
}

/// Optional overrides parsed from a TOML file; missing keys keep defaults.
#[derive(Debug, Clone, Default, Deserialize)]
struct ConfigFile {
    model_url: Option<String>,
    model_name: Option<String>,
    volume_spike_threshold: Option<usize>,
    auto_fix_confidence: Option<f64>,
    search_top_k: Option<usize>,
    diagnoser_timeout_secs: Option<u64>,
    kb_timeout_secs: Option<u64>,
    state_dir: Option<PathBuf>,
    failure_signatures: Option<Vec<String>>,
    payment_categories: Option<Vec<String>>,
    checkout_keywords: Option<Vec<String>>,
    revenue_keywords: Option<Vec<String>>,
}

impl TriageConfig {
    /// Load env-backed defaults, then apply overrides from a TOML file.
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).context(format!("Failed to read {}", path.display()))?;
        let file: ConfigFile =
            toml::from_str(&content).context("Failed to parse triage config TOML")?;

        let mut config = Self::default();
        if let Some(v) = file.model_url {
            config.model_url = v;
        }
        if let Some(v) = file.model_name {
            config.model_name = v;
        }
        if let Some(v) = file.volume_spike_threshold {
            config.volume_spike_threshold = v;
        }
        if let Some(v) = file.auto_fix_confidence {
            config.auto_fix_confidence = v;
        }
        if let Some(v) = file.search_top_k {
            config.search_top_k = v;
        }
        if let Some(v) = file.diagnoser_timeout_secs {
            config.diagnoser_timeout_secs = v;
        }
        if let Some(v) = file.kb_timeout_secs {
            config.kb_timeout_secs = v;
        }
        if let Some(v) = file.state_dir {
            config.state_dir = Some(v);
        }
        if let Some(v) = file.failure_signatures {
            config.failure_signatures = v;
        }
        if let Some(v) = file.payment_categories {
            config.payment_categories = v;
        }
        if let Some(v) = file.checkout_keywords {
            config.checkout_keywords = v;
        }
        if let Some(v) = file.revenue_keywords {
            config.revenue_keywords = v;
        }
        Ok(config)
    }

    /// Cluster engine wired with the configured threshold and signatures.
    pub fn cluster_engine(&self) -> ClusterEngine {
        ClusterEngine::new(self.volume_spike_threshold, self.failure_signatures.clone())
    }

    /// Risk assessor wired with the configured keyword lists.
    pub fn risk_assessor(&self) -> RiskAssessor {
        RiskAssessor::new(
            self.payment_categories.clone(),
            self.checkout_keywords.clone(),
            self.revenue_keywords.clone(),
        )
    }

    /// Decision policy wired with the configured auto-fix threshold.
    pub fn decision_policy(&self) -> DecisionPolicy {
        DecisionPolicy::new(self.auto_fix_confidence)
    }

    pub fn diagnoser_timeout(&self) -> Duration {
        Duration::from_secs(self.diagnoser_timeout_secs)
    }

    pub fn kb_timeout(&self) -> Duration {
        Duration::from_secs(self.kb_timeout_secs)
    }
}

fn to_owned_list(defaults: &[&str]) -> Vec<String> {
    defaults.iter().map(|s| s.to_string()).collect()
}

/// Check if the diagnoser endpoint is reachable (GET /models).
pub async fn check_endpoint(url: &str) -> bool {
    let models_url = format!("{url}/models");
    match reqwest::Client::new()
        .get(&models_url)
        .timeout(Duration::from_secs(5))
        .send()
        .await
    {
        Ok(resp) => resp.status().is_success(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use once_cell::sync::Lazy;
    use std::io::Write;
    use std::sync::Mutex;

    // Env vars are process-global; serialize the tests that touch them.
    static ENV_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

    const TRIAGE_VARS: &[&str] = &[
        "TRIAGE_MODEL_URL",
        "TRIAGE_MODEL_NAME",
        "TRIAGE_VOLUME_SPIKE_THRESHOLD",
        "TRIAGE_AUTO_FIX_CONFIDENCE",
        "TRIAGE_SEARCH_TOP_K",
        "TRIAGE_DIAGNOSER_TIMEOUT_SECS",
        "TRIAGE_KB_TIMEOUT_SECS",
        "TRIAGE_STATE_DIR",
    ];

    fn clear_env() {
        for var in TRIAGE_VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn test_defaults_without_env() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();

        let config = TriageConfig::default();
        assert_eq!(config.volume_spike_threshold, 50);
        assert_eq!(config.auto_fix_confidence, 0.85);
        assert_eq!(config.search_top_k, 3);
        assert_eq!(config.kb_timeout_secs, 10);
        assert!(config.state_dir.is_none());
        assert!(config.failure_signatures.contains(&"webhook".to_string()));
        assert!(config.payment_categories.contains(&"payment".to_string()));
    }

    #[test]
    fn test_env_overrides() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        std::env::set_var("TRIAGE_VOLUME_SPIKE_THRESHOLD", "10");
        std::env::set_var("TRIAGE_AUTO_FIX_CONFIDENCE", "0.9");
        std::env::set_var("TRIAGE_MODEL_NAME", "test-model");

        let config = TriageConfig::default();
        assert_eq!(config.volume_spike_threshold, 10);
        assert_eq!(config.auto_fix_confidence, 0.9);
        assert_eq!(config.model_name, "test-model");

        clear_env();
    }

    #[test]
    fn test_unparseable_env_falls_back() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        std::env::set_var("TRIAGE_VOLUME_SPIKE_THRESHOLD", "not-a-number");

        let config = TriageConfig::default();
        assert_eq!(config.volume_spike_threshold, 50);

        clear_env();
    }

    #[test]
    fn test_toml_overrides_merge_over_defaults() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "volume_spike_threshold = 25\nfailure_signatures = [\"webhook\", \"dns\"]"
        )
        .unwrap();

        let config = TriageConfig::from_toml_file(file.path()).unwrap();
        assert_eq!(config.volume_spike_threshold, 25);
        assert_eq!(config.failure_signatures, vec!["webhook", "dns"]);
        // Keys absent from the file keep their defaults.
        assert_eq!(config.auto_fix_confidence, 0.85);
        assert_eq!(config.search_top_k, 3);
    }

    #[test]
    fn test_toml_missing_file_errors() {
        let err = TriageConfig::from_toml_file(Path::new("/nonexistent/triage.toml"));
        assert!(err.is_err());
    }
}
