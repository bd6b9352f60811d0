//! Managed-cloud subscription tiers and their quotas.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::error::{ProviderError, Result};

/// Internal marker for "no limit"
const UNLIMITED: i64 = -1;

/// Subscription level, ordered from least to most capable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Basic,
    Pro,
    Enterprise,
}

impl Tier {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Pro => "pro",
            Self::Enterprise => "enterprise",
        }
    }

    /// Monthly (tokens, requests); `UNLIMITED` means no cap.
    fn limits(&self) -> (i64, i64) {
        match self {
            Self::Basic => (100_000, 1_000),
            Self::Pro => (1_000_000, 10_000),
            Self::Enterprise => (UNLIMITED, UNLIMITED),
        }
    }

    fn features(&self) -> &'static [&'static str] {
        match self {
            Self::Basic => &["embeddings", "completion", "relevance"],
            Self::Pro => &[
                "embeddings",
                "completion",
                "relevance",
                "team_sharing",
                "analytics",
            ],
            Self::Enterprise => &[
                "embeddings",
                "completion",
                "relevance",
                "team_sharing",
                "analytics",
                "priority_support",
            ],
        }
    }

    pub fn info(&self) -> TierInfo {
        let (tokens, requests) = self.limits();
        TierInfo {
            tier: *self,
            monthly_tokens: Limit::from_raw(tokens),
            monthly_requests: Limit::from_raw(requests),
            features: self.features().iter().map(|f| f.to_string()).collect(),
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A monthly quota, serialized as a number or the string `"unlimited"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    Capped(u64),
    Unlimited,
}

impl Limit {
    fn from_raw(raw: i64) -> Self {
        u64::try_from(raw).map_or(Self::Unlimited, Self::Capped)
    }

    pub fn is_unlimited(&self) -> bool {
        matches!(self, Self::Unlimited)
    }
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Capped(n) => write!(f, "{n}"),
            Self::Unlimited => f.write_str("unlimited"),
        }
    }
}

impl Serialize for Limit {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Capped(n) => serializer.serialize_u64(*n),
            Self::Unlimited => serializer.serialize_str("unlimited"),
        }
    }
}

/// Accepts a count, the `-1` sentinel, or `"unlimited"`.
impl<'de> Deserialize<'de> for Limit {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Wire {
            Count(i64),
            Label(String),
        }

        match Wire::deserialize(deserializer)? {
            Wire::Count(raw) => Ok(Self::from_raw(raw)),
            Wire::Label(label) if label.eq_ignore_ascii_case("unlimited") => Ok(Self::Unlimited),
            Wire::Label(label) => Err(serde::de::Error::custom(format!("invalid limit: {label}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TierInfo {
    pub tier: Tier,
    pub monthly_tokens: Limit,
    pub monthly_requests: Limit,
    pub features: Vec<String>,
}

/// Fail with `TierRestriction` unless `current` is at least `required`.
pub fn require_tier(feature: &'static str, current: Tier, required: Tier) -> Result<()> {
    if current >= required {
        Ok(())
    } else {
        Err(ProviderError::TierRestriction {
            feature,
            current,
            required,
        })
    }
}
