//! Remote configuration payloads.
//!
//! Field names follow the wire format (camelCase JSON). The same encoding is
//! used for persistence, so a generation round-trips losslessly through
//! parse → adopt → serialize → persist.

use serde::{Deserialize, Serialize};

use crate::auth::AuthScheme;

/// Default refresh rate in seconds when Settings does not list one.
pub const DEFAULT_REFRESH_RATE_SECS: i32 = 30;

/// Refresh-rate key that has no default.
pub const CDN_STALE_TIME_DIFF: &str = "cdn_stale_time_diff";

/// One logical API group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Module {
    pub name: String,
    pub uri: String,
    pub version: String,
    /// Index of the active host in `Endpoints::app_urls`.
    pub in_use: u32,
    /// Remaining full rotation cycles. 0 in a fresh payload means unset.
    pub max_fails: u32,
}

/// Image route id → URL template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FormatMap {
    pub id: String,
    pub value: String,
}

/// Per-host auth declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSetting {
    pub enabled: bool,
    pub auth_type: String,
}

/// Auth declaration keyed by host name with `.` replaced by `-`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AuthMap {
    pub key: String,
    pub auth: AuthSetting,
}

/// One Endpoints generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Endpoints {
    /// Host templates shared by every module; `{0}` is the scheme placeholder.
    pub app_urls: Vec<String>,
    pub modules: Vec<Module>,
    pub img_path: Vec<FormatMap>,
    pub auth: Vec<AuthMap>,
    pub last_updated_time: i64,
}

impl Endpoints {
    /// A structurally-empty payload is treated as absent.
    pub fn is_empty(&self) -> bool {
        self.app_urls.is_empty() || self.modules.is_empty()
    }

    pub fn module(&self, name: &str) -> Option<&Module> {
        self.modules.iter().find(|m| m.name == name)
    }

    /// Replace the module with the same name. Returns false if absent.
    pub fn replace_module(&mut self, module: &Module) -> bool {
        match self.modules.iter_mut().find(|m| m.name == module.name) {
            Some(slot) => {
                *slot = module.clone();
                true
            }
            None => false,
        }
    }

    /// Auth scheme declared for `host`, if enabled.
    pub fn auth_scheme_for(&self, host: &str) -> Option<AuthScheme> {
        let key = host.replace('.', "-");
        self.auth
            .iter()
            .find(|m| m.key == key)
            .filter(|m| m.auth.enabled)
            .map(|m| AuthScheme::parse(&m.auth.auth_type))
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FeatureToggle {
    pub key: String,
    pub value: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RefreshRate {
    pub key: String,
    pub value: i32,
}

/// One Settings generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub last_update_time: i64,
    pub feature_toggles: Vec<FeatureToggle>,
    pub refresh_rates: Vec<RefreshRate>,
}

impl Settings {
    pub fn is_empty(&self) -> bool {
        self.last_update_time == 0 && self.feature_toggles.is_empty() && self.refresh_rates.is_empty()
    }

    pub fn is_feature_enabled(&self, key: &str) -> bool {
        self.feature_toggles
            .iter()
            .find(|t| t.key == key)
            .is_some_and(|t| t.value)
    }

    /// Refresh rate for `key` in seconds. Unlisted keys default to 30s,
    /// except `cdn_stale_time_diff` which has no default.
    pub fn refresh_rate(&self, key: &str) -> Option<i32> {
        match self.refresh_rates.iter().find(|r| r.key == key) {
            Some(rate) => Some(rate.value),
            None if key == CDN_STALE_TIME_DIFF => None,
            None => Some(DEFAULT_REFRESH_RATE_SECS),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
