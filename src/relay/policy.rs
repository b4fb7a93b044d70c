//! Repository topic allow-policy.
//!
//! A dispatch is only sent to repositories carrying the configured topics.
//! With an empty required set the policy is disabled and no topic lookup is
//! made at all.

use std::fmt;
use std::str::FromStr;

/// How the required topics are matched against a repository's topics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TopicMatchMode {
    /// At least one required topic must be present.
    #[default]
    Any,

    /// Every required topic must be present.
    All,
}

impl FromStr for TopicMatchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "any" => Ok(TopicMatchMode::Any),
            "all" => Ok(TopicMatchMode::All),
            other => Err(format!("unknown topic match mode {other:?} (expected any or all)")),
        }
    }
}

impl fmt::Display for TopicMatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopicMatchMode::Any => write!(f, "any"),
            TopicMatchMode::All => write!(f, "all"),
        }
    }
}

/// Required topics plus the match mode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicPolicy {
    required: Vec<String>,
    mode: TopicMatchMode,
}

impl TopicPolicy {
    /// Creates a policy. Topics are compared case-insensitively, as GitHub
    /// stores them lowercased.
    pub fn new(required: Vec<String>, mode: TopicMatchMode) -> Self {
        let required = required
            .into_iter()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        Self { required, mode }
    }

    /// Returns true if the policy requires nothing (and is therefore skipped).
    pub fn is_empty(&self) -> bool {
        self.required.is_empty()
    }

    pub fn required(&self) -> &[String] {
        &self.required
    }

    pub fn mode(&self) -> TopicMatchMode {
        self.mode
    }

    /// Evaluates the policy against a repository's topics.
    ///
    /// An empty policy allows everything.
    pub fn allows(&self, topics: &[String]) -> bool {
        if self.is_empty() {
            return true;
        }
        let has = |required: &String| topics.iter().any(|t| t.eq_ignore_ascii_case(required));
        match self.mode {
            TopicMatchMode::Any => self.required.iter().any(has),
            TopicMatchMode::All => self.required.iter().all(has),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topics(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn empty_policy_allows_everything() {
        let policy = TopicPolicy::default();
        assert!(policy.allows(&[]));
        assert!(policy.allows(&topics(&["x"])));
    }

    #[test]
    fn any_mode_requires_one_match() {
        let policy = TopicPolicy::new(topics(&["stackrox-copa", "patched"]), TopicMatchMode::Any);
        assert!(policy.allows(&topics(&["rust", "patched"])));
        assert!(!policy.allows(&topics(&["rust", "web"])));
        assert!(!policy.allows(&[]));
    }

    #[test]
    fn all_mode_requires_every_match() {
        let policy = TopicPolicy::new(topics(&["stackrox-copa", "patched"]), TopicMatchMode::All);
        assert!(policy.allows(&topics(&["patched", "stackrox-copa", "rust"])));
        assert!(!policy.allows(&topics(&["patched"])));
    }

    #[test]
    fn matching_ignores_case() {
        let policy = TopicPolicy::new(topics(&["Stackrox-Copa"]), TopicMatchMode::Any);
        assert!(policy.allows(&topics(&["stackrox-copa"])));
    }

    #[test]
    fn parses_modes() {
        assert_eq!("any".parse::<TopicMatchMode>(), Ok(TopicMatchMode::Any));
        assert_eq!(" ALL ".parse::<TopicMatchMode>(), Ok(TopicMatchMode::All));
        assert!("most".parse::<TopicMatchMode>().is_err());
    }
}
