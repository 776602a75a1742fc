//! Interest predicates over instances.
//!
//! An [`Interest`] selects the slice of the registry a subscriber cares
//! about: everything, one application, a (secure) VIP address, a single
//! instance id, or a conjunction of those. `Like` patterns are regular
//! expressions, compiled lazily on first match; an invalid pattern matches
//! nothing and warns once.

use std::sync::OnceLock;

use regex::Regex;

use crate::instance::InstanceInfo;

/// How an interest value is compared against an instance field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOperator {
    Equals,
    Like,
}

/// A value plus its comparison operator, with a lazily compiled pattern.
#[derive(Debug, Clone)]
pub struct InterestPattern {
    value: String,
    operator: MatchOperator,
    compiled: OnceLock<Option<Regex>>,
}

impl InterestPattern {
    pub fn equals(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            operator: MatchOperator::Equals,
            compiled: OnceLock::new(),
        }
    }

    pub fn like(pattern: impl Into<String>) -> Self {
        Self {
            value: pattern.into(),
            operator: MatchOperator::Like,
            compiled: OnceLock::new(),
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn operator(&self) -> MatchOperator {
        self.operator
    }

    fn matches(&self, candidate: &str) -> bool {
        match self.operator {
            MatchOperator::Equals => self.value == candidate,
            MatchOperator::Like => {
                let compiled = self.compiled.get_or_init(|| match Regex::new(&self.value) {
                    Ok(re) => Some(re),
                    Err(err) => {
                        tracing::warn!(pattern = %self.value, error = %err, "invalid interest pattern");
                        None
                    }
                });
                compiled
                    .as_ref()
                    .map(|re| re.is_match(candidate))
                    .unwrap_or(false)
            }
        }
    }

    fn matches_opt(&self, candidate: Option<&str>) -> bool {
        candidate.map(|c| self.matches(c)).unwrap_or(false)
    }
}

/// Predicate over [`InstanceInfo`] used to filter snapshots and notification
/// streams. `Composite` folds AND over its members; an empty composite
/// matches everything, like `FullRegistry`.
#[derive(Debug, Clone)]
pub enum Interest {
    FullRegistry,
    Application(InterestPattern),
    Vip(InterestPattern),
    SecureVip(InterestPattern),
    InstanceId(InterestPattern),
    Composite(Vec<Interest>),
}

impl Interest {
    pub fn application(name: impl Into<String>) -> Self {
        Interest::Application(InterestPattern::equals(name))
    }

    pub fn application_like(pattern: impl Into<String>) -> Self {
        Interest::Application(InterestPattern::like(pattern))
    }

    pub fn vip(name: impl Into<String>) -> Self {
        Interest::Vip(InterestPattern::equals(name))
    }

    pub fn vip_like(pattern: impl Into<String>) -> Self {
        Interest::Vip(InterestPattern::like(pattern))
    }

    pub fn secure_vip(name: impl Into<String>) -> Self {
        Interest::SecureVip(InterestPattern::equals(name))
    }

    pub fn instance_id(id: impl Into<String>) -> Self {
        Interest::InstanceId(InterestPattern::equals(id))
    }

    pub fn composite(members: impl IntoIterator<Item = Interest>) -> Self {
        Interest::Composite(members.into_iter().collect())
    }

    pub fn matches(&self, info: &InstanceInfo) -> bool {
        match self {
            Interest::FullRegistry => true,
            Interest::Application(p) => p.matches(&info.app),
            Interest::Vip(p) => p.matches_opt(info.vip_address.as_deref()),
            Interest::SecureVip(p) => p.matches_opt(info.secure_vip_address.as_deref()),
            Interest::InstanceId(p) => p.matches(&info.instance_id),
            Interest::Composite(members) => members.iter().all(|m| m.matches(info)),
        }
    }
}
