//! Feature identity and ledger entries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::limits::MAX_FEATURE_ID_LEN;

/// Identifier of an independently versioned unit of schema ownership
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureId(String);

impl FeatureId {
    /// Create a feature id, rejecting empty or oversized names
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(Error::InvalidFeatureId("feature id cannot be empty".to_string()));
        }
        if id.len() > MAX_FEATURE_ID_LEN {
            return Err(Error::InvalidFeatureId(format!(
                "'{}' exceeds {} characters",
                id, MAX_FEATURE_ID_LEN
            )));
        }
        if id.chars().any(|c| c.is_control()) {
            return Err(Error::InvalidFeatureId(format!("'{}' contains control characters", id)));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for FeatureId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for FeatureId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

/// Last applied migration version of one feature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureVersion {
    pub feature_id: FeatureId,

    /// 0 means the feature was never migrated
    pub applied_version: u32,

    /// Time of the last committed step
    pub updated_at: DateTime<Utc>,
}

impl FeatureVersion {
    pub fn new(feature_id: FeatureId, applied_version: u32) -> Self {
        Self {
            feature_id,
            applied_version,
            updated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_id_validation() {
        assert!(FeatureId::new("ContentManagement").is_ok());
        assert!(FeatureId::new("").is_err());
        assert!(FeatureId::new("   ").is_err());
        assert!(FeatureId::new("a".repeat(MAX_FEATURE_ID_LEN + 1)).is_err());
        assert!(FeatureId::new("bad\nid").is_err());
    }

    #[test]
    fn test_feature_id_serializes_as_string() {
        let id = FeatureId::new("Contents").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"Contents\"");
        let parsed: FeatureId = "Contents".parse().unwrap();
        assert_eq!(parsed, id);
    }
}
