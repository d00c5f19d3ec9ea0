use chrono::{DateTime, Utc};
use glob::Pattern;
use serde::{Deserialize, Serialize};

use crate::error::{PrismError, Result};

/// Glob over service names, e.g. `auth-*`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceFilter {
    pub glob: String,
}

impl ServiceFilter {
    pub fn parse(input: &str) -> Result<Self> {
        let glob = input.trim();
        if glob.is_empty() {
            return Err(PrismError::Parse("empty service filter".to_string()));
        }
        Pattern::new(glob)
            .map_err(|e| PrismError::Parse(format!("invalid service filter {glob}: {e}")))?;
        Ok(Self {
            glob: glob.to_string(),
        })
    }

    pub fn matches(&self, service: &str) -> bool {
        Pattern::new(&self.glob)
            .map(|p| p.matches(service))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimeWindow {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl TimeWindow {
    pub fn all() -> Self {
        Self {
            since: None,
            until: None,
        }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        if let Some(since) = self.since
            && ts < since
        {
            return false;
        }
        if let Some(until) = self.until
            && ts > until
        {
            return false;
        }
        true
    }
}
