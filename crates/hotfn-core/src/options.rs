//! Caching options — the per-worker container pool configuration.
//!
//! Options are changed at runtime through partial updates: each field of
//! [`CachingOptionsUpdate`] is independently present or absent, and an
//! update is validated as a whole before any field is applied.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced while parsing or applying an options update.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OptionsError {
    #[error("invalid value for '{field}': {value}")]
    InvalidValue { field: &'static str, value: String },

    #[error("'{0}' must be at least 1")]
    ZeroLimit(&'static str),
}

/// Container pool configuration for one worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CachingOptions {
    /// Largest user code (bytes) a worker accepts. 0 disables the check.
    pub user_code_size_limit: u64,
    /// Resident containers allowed per function.
    pub container_pool_limit: usize,
    /// Resident containers allowed across all functions.
    pub container_pool_num: usize,
    /// Reclaim idle containers after `rest_container_life_time`.
    pub using_rest_mode: bool,
    /// Idle lifetime in seconds before a container is reclaimed.
    pub rest_container_life_time: u64,
}

impl Default for CachingOptions {
    fn default() -> Self {
        Self {
            user_code_size_limit: 50 * 1024 * 1024,
            container_pool_limit: 4,
            container_pool_num: 16,
            using_rest_mode: false,
            rest_container_life_time: 60,
        }
    }
}

impl CachingOptions {
    pub fn rest_lifetime(&self) -> Duration {
        Duration::from_secs(self.rest_container_life_time)
    }

    /// Whether a function of `code_size` bytes may be provisioned.
    pub fn admits_code_size(&self, code_size: u64) -> bool {
        self.user_code_size_limit == 0 || code_size <= self.user_code_size_limit
    }

    pub fn validate(&self) -> Result<(), OptionsError> {
        if self.container_pool_limit == 0 {
            return Err(OptionsError::ZeroLimit("container_pool_limit"));
        }
        if self.container_pool_num == 0 {
            return Err(OptionsError::ZeroLimit("container_pool_num"));
        }
        Ok(())
    }

    /// Apply a partial update. On error `self` is left untouched.
    pub fn apply(&mut self, update: &CachingOptionsUpdate) -> Result<OptionsChange, OptionsError> {
        let mut next = self.clone();
        if let Some(v) = update.user_code_size_limit {
            next.user_code_size_limit = v;
        }
        if let Some(v) = update.container_pool_limit {
            next.container_pool_limit = v;
        }
        if let Some(v) = update.container_pool_num {
            next.container_pool_num = v;
        }
        if let Some(v) = update.using_rest_mode {
            next.using_rest_mode = v;
        }
        if let Some(v) = update.rest_container_life_time {
            next.rest_container_life_time = v;
        }
        next.validate()?;

        let change = OptionsChange {
            changed: next != *self,
            rest_mode_toggled: next.using_rest_mode != self.using_rest_mode,
        };
        *self = next;
        Ok(change)
    }
}

/// What an applied update changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OptionsChange {
    pub changed: bool,
    pub rest_mode_toggled: bool,
}

/// A partial update to [`CachingOptions`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachingOptionsUpdate {
    pub user_code_size_limit: Option<u64>,
    pub container_pool_limit: Option<usize>,
    pub container_pool_num: Option<usize>,
    pub using_rest_mode: Option<bool>,
    pub rest_container_life_time: Option<u64>,
}

impl CachingOptionsUpdate {
    /// Build an update from `/configure` query parameters.
    ///
    /// Unknown keys are ignored. `using_rest_mode` accepts exactly
    /// `true` or `false`.
    pub fn from_query(params: &HashMap<String, String>) -> Result<Self, OptionsError> {
        Ok(Self {
            user_code_size_limit: parse_field(params, "user_code_size_limit")?,
            container_pool_limit: parse_field(params, "container_pool_limit")?,
            container_pool_num: parse_field(params, "container_pool_num")?,
            using_rest_mode: match params.get("using_rest_mode").map(String::as_str) {
                None => None,
                Some("true") => Some(true),
                Some("false") => Some(false),
                Some(other) => {
                    return Err(OptionsError::InvalidValue {
                        field: "using_rest_mode",
                        value: other.to_string(),
                    });
                }
            },
            rest_container_life_time: parse_field(params, "rest_container_life_time")?,
        })
    }
}

fn parse_field<T: std::str::FromStr>(
    params: &HashMap<String, String>,
    field: &'static str,
) -> Result<Option<T>, OptionsError> {
    params
        .get(field)
        .map(|raw| {
            raw.trim().parse().map_err(|_| OptionsError::InvalidValue {
                field,
                value: raw.clone(),
            })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn update_from_query_keeps_absent_fields_unset() {
        let update =
            CachingOptionsUpdate::from_query(&query(&[("container_pool_limit", "2")])).unwrap();
        assert_eq!(update.container_pool_limit, Some(2));
        assert_eq!(update.using_rest_mode, None);
        assert_eq!(update.rest_container_life_time, None);
    }

    #[test]
    fn rest_mode_accepts_only_true_or_false() {
        let update =
            CachingOptionsUpdate::from_query(&query(&[("using_rest_mode", "false")])).unwrap();
        assert_eq!(update.using_rest_mode, Some(false));

        let err = CachingOptionsUpdate::from_query(&query(&[("using_rest_mode", "yes")]))
            .unwrap_err();
        assert!(matches!(err, OptionsError::InvalidValue { field: "using_rest_mode", .. }));
    }

    #[test]
    fn non_numeric_limit_is_rejected() {
        let err = CachingOptionsUpdate::from_query(&query(&[("container_pool_num", "lots")]))
            .unwrap_err();
        assert_eq!(
            err,
            OptionsError::InvalidValue {
                field: "container_pool_num",
                value: "lots".to_string()
            }
        );
    }

    #[test]
    fn apply_reports_rest_mode_toggle() {
        let mut opts = CachingOptions::default();
        let change = opts
            .apply(&CachingOptionsUpdate {
                using_rest_mode: Some(true),
                ..Default::default()
            })
            .unwrap();
        assert!(change.changed);
        assert!(change.rest_mode_toggled);
        assert!(opts.using_rest_mode);

        // Re-sending the same value is not a toggle.
        let change = opts
            .apply(&CachingOptionsUpdate {
                using_rest_mode: Some(true),
                ..Default::default()
            })
            .unwrap();
        assert!(!change.changed);
        assert!(!change.rest_mode_toggled);
    }

    #[test]
    fn apply_is_atomic_on_invalid_update() {
        let mut opts = CachingOptions::default();
        let before = opts.clone();
        let err = opts
            .apply(&CachingOptionsUpdate {
                container_pool_limit: Some(8),
                container_pool_num: Some(0),
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err, OptionsError::ZeroLimit("container_pool_num"));
        assert_eq!(opts, before);
    }

    #[test]
    fn zero_code_size_limit_admits_everything() {
        let opts = CachingOptions {
            user_code_size_limit: 0,
            ..Default::default()
        };
        assert!(opts.admits_code_size(u64::MAX));

        let opts = CachingOptions {
            user_code_size_limit: 1024,
            ..Default::default()
        };
        assert!(opts.admits_code_size(1024));
        assert!(!opts.admits_code_size(1025));
    }
}
