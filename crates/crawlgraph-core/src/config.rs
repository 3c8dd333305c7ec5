use std::time::Duration;

use crawlgraph_explore::{
    CrawlRules, DispatchOrder, EquivalenceRule, LimitViolation, RunLimits, SelectionRule,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("invalid limits: {0}")]
    Limits(#[from] LimitViolation),
}

/// Everything needed to start a run against one application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlConfig {
    pub url: String,
    #[serde(default)]
    pub limits: RunLimits,
    #[serde(default)]
    pub rules: CrawlRules,
}

impl CrawlConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            limits: RunLimits::default(),
            rules: CrawlRules::default(),
        }
    }

    /// Parse and validate a JSON config. Missing `limits`/`rules` fields
    /// take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = url::Url::parse(&self.url).map_err(|e| ConfigError::Invalid {
            field: "url",
            reason: e.to_string(),
        })?;
        if self.rules.stay_on_domain && url.host_str().is_none() {
            return Err(ConfigError::Invalid {
                field: "url",
                reason: "staying on the domain requires a url with a host".to_string(),
            });
        }

        self.limits.validate()?;

        if let SelectionRule::Influence { max_repeat: 0 } = self.rules.selection {
            return Err(ConfigError::Invalid {
                field: "rules.selection.max_repeat",
                reason: "must be at least 1".to_string(),
            });
        }
        if let EquivalenceRule::NearDuplicate { threshold } = self.rules.equivalence {
            if threshold > 64 {
                return Err(ConfigError::Invalid {
                    field: "rules.equivalence.threshold",
                    reason: format!("{threshold} exceeds the 64-bit fingerprint"),
                });
            }
        }
        Ok(())
    }

    pub fn with_max_states(mut self, max_states: usize) -> Self {
        self.limits.max_states = max_states;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.limits.max_depth = max_depth;
        self
    }

    pub fn with_max_run_time(mut self, max_run_time: Duration) -> Self {
        self.limits.max_run_time = max_run_time;
        self
    }

    pub fn with_browsers(mut self, browsers: usize) -> Self {
        self.limits.browsers = browsers;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.limits.shutdown_timeout = timeout;
        self
    }

    pub fn with_limits(mut self, limits: RunLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_rules(mut self, rules: CrawlRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_dispatch(mut self, dispatch: DispatchOrder) -> Self {
        self.rules.dispatch = dispatch;
        self
    }

    pub fn with_selection(mut self, selection: SelectionRule) -> Self {
        self.rules.selection = selection;
        self
    }

    pub fn with_equivalence(mut self, equivalence: EquivalenceRule) -> Self {
        self.rules.equivalence = equivalence;
        self
    }

    pub fn with_stay_on_domain(mut self, stay: bool) -> Self {
        self.rules.stay_on_domain = stay;
        self
    }

    pub fn with_restore_connected_states(mut self, restore: bool) -> Self {
        self.rules.restore_connected_states = restore;
        self
    }
}
