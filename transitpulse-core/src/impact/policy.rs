//! Category policy table: how each incident category affects edge weights

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::Error;

/// Multiplier standing in for "impassable". Large enough that any route using
/// a blocked edge loses against every unblocked one, but still finite so
/// weights stay comparable and serializable.
pub const BLOCKING_MULTIPLIER: f64 = 1e12;

/// Effect of a category on the weight of a matched edge
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Multiplier {
    Factor(f64),
    /// Makes the edge effectively unusable, active without any threshold
    Blocking,
}

impl Multiplier {
    pub fn value(self) -> f64 {
        match self {
            Multiplier::Factor(factor) => factor,
            Multiplier::Blocking => BLOCKING_MULTIPLIER,
        }
    }
}

impl fmt::Display for Multiplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Multiplier::Factor(factor) => write!(f, "{factor}x"),
            Multiplier::Blocking => f.write_str("blocking"),
        }
    }
}

impl Serialize for Multiplier {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Multiplier::Factor(factor) => serializer.serialize_f64(*factor),
            Multiplier::Blocking => serializer.serialize_str("blocking"),
        }
    }
}

impl<'de> Deserialize<'de> for Multiplier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Factor(f64),
            Keyword(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Factor(factor) => Ok(Multiplier::Factor(factor)),
            Repr::Keyword(keyword) if keyword.eq_ignore_ascii_case("blocking") => {
                Ok(Multiplier::Blocking)
            }
            Repr::Keyword(other) => Err(serde::de::Error::custom(format!(
                "unknown multiplier '{other}', expected a number or \"blocking\""
            ))),
        }
    }
}

/// Policy of one incident category
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CategoryPolicy {
    pub multiplier: Multiplier,
    /// Summed reporter score at which unapproved reports become active.
    /// Without a threshold only approved reports count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
}

impl CategoryPolicy {
    pub fn factor(multiplier: f64, threshold: f64) -> Self {
        Self {
            multiplier: Multiplier::Factor(multiplier),
            threshold: Some(threshold),
        }
    }

    pub fn blocking() -> Self {
        Self {
            multiplier: Multiplier::Blocking,
            threshold: None,
        }
    }

    /// Whether a bucket with this aggregated state influences its edge
    pub fn is_active(&self, any_approved: bool, aggregated_score: f64) -> bool {
        any_approved
            || self.multiplier == Multiplier::Blocking
            || self.threshold.is_some_and(|t| aggregated_score >= t)
    }
}

/// Category name to policy. Categories missing from the table have no effect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PolicyTable(BTreeMap<String, CategoryPolicy>);

impl Default for PolicyTable {
    fn default() -> Self {
        Self(BTreeMap::from([
            ("Traffic".to_string(), CategoryPolicy::factor(1.5, 50.0)),
            ("Crush".to_string(), CategoryPolicy::blocking()),
        ]))
    }
}

impl PolicyTable {
    pub fn new(categories: impl IntoIterator<Item = (String, CategoryPolicy)>) -> Self {
        Self(categories.into_iter().collect())
    }

    pub fn get(&self, category: &str) -> Option<&CategoryPolicy> {
        self.0.get(category)
    }

    pub fn categories(&self) -> impl Iterator<Item = (&str, &CategoryPolicy)> {
        self.0.iter().map(|(name, policy)| (name.as_str(), policy))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// # Errors
    ///
    /// Returns a configuration error for non-positive multipliers or negative thresholds
    pub fn validate(&self) -> Result<(), Error> {
        for (name, policy) in &self.0 {
            if let Multiplier::Factor(factor) = policy.multiplier {
                if !(factor > 0.0) || !factor.is_finite() {
                    return Err(Error::Configuration(format!(
                        "category '{name}' has invalid multiplier {factor}"
                    )));
                }
            }
            if let Some(threshold) = policy.threshold {
                if !(threshold >= 0.0) {
                    return Err(Error::Configuration(format!(
                        "category '{name}' has invalid threshold {threshold}"
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_numbers_and_blocking_keyword() {
        let table: PolicyTable = serde_json::from_str(
            r#"{"Traffic": {"multiplier": 1.5, "threshold": 50},
                "Crush": {"multiplier": "blocking"}}"#,
        )
        .unwrap();
        assert_eq!(table, PolicyTable::default());
    }

    #[test]
    fn rejects_unknown_keywords() {
        let parsed = serde_json::from_str::<CategoryPolicy>(r#"{"multiplier": "huge"}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn activation_rules() {
        let traffic = CategoryPolicy::factor(1.5, 50.0);
        assert!(!traffic.is_active(false, 45.0));
        assert!(traffic.is_active(false, 50.0));
        assert!(traffic.is_active(true, 0.0));

        assert!(CategoryPolicy::blocking().is_active(false, 0.0));

        let approval_only = CategoryPolicy {
            multiplier: Multiplier::Factor(2.0),
            threshold: None,
        };
        assert!(!approval_only.is_active(false, 1e9));
        assert!(approval_only.is_active(true, 0.0));
    }

    #[test]
    fn validation_rejects_non_positive_factors() {
        let table = PolicyTable::new([("Bad".to_string(), CategoryPolicy::factor(0.0, 10.0))]);
        assert!(matches!(table.validate(), Err(Error::Configuration(_))));
        assert!(PolicyTable::default().validate().is_ok());
    }

    #[test]
    fn blocking_serializes_as_keyword() {
        let json = serde_json::to_value(CategoryPolicy::blocking()).unwrap();
        assert_eq!(json, serde_json::json!({"multiplier": "blocking"}));
    }
}
