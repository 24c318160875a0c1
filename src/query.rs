//! Discovery query and its cache fingerprint.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;

use crate::error::PipelineError;

/// Query shape as received from the routing layer.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct QueryInput {
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub month: String,
    #[serde(default)]
    pub interests: Vec<String>,
}

/// Validated, immutable query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    location: String,
    month: String,
    interests: BTreeSet<String>,
}

impl Query {
    /// Validate and build. `location` and `month` must be non-blank.
    pub fn new<I, S>(location: &str, month: &str, interests: I) -> Result<Self, PipelineError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let location = location.trim();
        let month = month.trim();
        if location.is_empty() {
            return Err(PipelineError::InvalidQuery("location is required".into()));
        }
        if month.is_empty() {
            return Err(PipelineError::InvalidQuery("month is required".into()));
        }
        let interests = interests
            .into_iter()
            .map(|s| s.as_ref().trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        Ok(Self {
            location: location.to_string(),
            month: month.to_string(),
            interests,
        })
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn month(&self) -> &str {
        &self.month
    }

    pub fn interests(&self) -> &BTreeSet<String> {
        &self.interests
    }

    /// Interests lowercased, in sorted order.
    pub fn interests_lower(&self) -> Vec<String> {
        let set: BTreeSet<String> = self.interests.iter().map(|s| s.to_lowercase()).collect();
        set.into_iter().collect()
    }

    /// Stable hash of (lowercased location, lowercased month, sorted interests).
    pub fn fingerprint(&self) -> Fingerprint {
        let mut hasher = Sha256::new();
        hasher.update(self.location.to_lowercase().as_bytes());
        hasher.update([0x1f]);
        hasher.update(self.month.to_lowercase().as_bytes());
        for interest in self.interests_lower() {
            hasher.update([0x1e]);
            hasher.update(interest.as_bytes());
        }
        let digest = hasher.finalize();
        let mut out = String::with_capacity(64);
        for b in digest.iter() {
            use std::fmt::Write as _;
            let _ = write!(&mut out, "{:02x}", b);
        }
        Fingerprint(out)
    }
}

impl TryFrom<QueryInput> for Query {
    type Error = PipelineError;

    fn try_from(input: QueryInput) -> Result<Self, Self::Error> {
        Query::new(&input.location, &input.month, &input.interests)
    }
}

/// Hex-encoded SHA-256 of the normalized query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // short form is enough for logs
        write!(f, "{}", &self.0[..12.min(self.0.len())])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_ignores_case_and_interest_order() {
        let a = Query::new("Bangalore", "October", ["Music", "food"]).unwrap();
        let b = Query::new("bangalore ", "OCTOBER", ["food", "music"]).unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_differs_on_interests() {
        let a = Query::new("Pune", "May", ["music"]).unwrap();
        let b = Query::new("Pune", "May", Vec::<String>::new()).unwrap();
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn blank_fields_are_invalid() {
        assert!(matches!(
            Query::new("  ", "May", Vec::<String>::new()),
            Err(PipelineError::InvalidQuery(_))
        ));
        assert!(matches!(
            Query::new("Goa", "", Vec::<String>::new()),
            Err(PipelineError::InvalidQuery(_))
        ));
    }

    #[test]
    fn month_is_kept_verbatim_after_trim() {
        let q = Query::new("Goa", " octOber ", Vec::<String>::new()).unwrap();
        assert_eq!(q.month(), "octOber");
    }
}
