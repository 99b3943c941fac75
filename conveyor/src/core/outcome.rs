//! Stage outcomes and parcel content.

use serde::{Deserialize, Serialize};

/// The payload carried by a parcel.
pub type Payload = serde_json::Value;

/// The result of one transform call.
///
/// Every consumer matches this exhaustively; there is no untyped escape hatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Outcome {
    /// An ordinary value to forward downstream.
    Value(Payload),
    /// End generation. Only meaningful when returned by a source.
    Stop,
    /// Discard this item. Not an error.
    Skip,
    /// Terminal error marker, produced after retries are exhausted.
    Failure,
    /// Fan-out expansion: each item is forwarded as its own parcel sharing
    /// the parent's sequence.
    Expand(Vec<Payload>),
}

impl Outcome {
    /// Creates a value outcome.
    #[must_use]
    pub fn value(value: impl Into<Payload>) -> Self {
        Self::Value(value.into())
    }

    /// Creates an expansion outcome from any iterable of payload-convertible items.
    #[must_use]
    pub fn expand<I, T>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Payload>,
    {
        Self::Expand(items.into_iter().map(Into::into).collect())
    }

    /// Returns true if this is the stop sentinel.
    #[must_use]
    pub const fn is_stop(&self) -> bool {
        matches!(self, Self::Stop)
    }

    /// Returns true for the control sentinels (stop, skip, failure).
    #[must_use]
    pub const fn is_sentinel(&self) -> bool {
        matches!(self, Self::Stop | Self::Skip | Self::Failure)
    }

    /// Returns the short tag used in log messages.
    #[must_use]
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::Value(_) => "Value",
            Self::Stop => "Stop",
            Self::Skip => "Skip",
            Self::Failure => "Failure",
            Self::Expand(_) => "Expand",
        }
    }
}

impl Default for Outcome {
    fn default() -> Self {
        Self::Value(Payload::Null)
    }
}

impl From<Payload> for Outcome {
    fn from(value: Payload) -> Self {
        Self::Value(value)
    }
}

/// What a parcel carries between stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Content {
    /// An ordinary value.
    Value(Payload),
    /// An item an upstream stage chose to discard.
    Skip,
    /// An item whose upstream transform failed after retries.
    Failure,
}

impl Content {
    /// Returns the value, or `None` for sentinels.
    #[must_use]
    pub const fn value(&self) -> Option<&Payload> {
        match self {
            Self::Value(v) => Some(v),
            Self::Skip | Self::Failure => None,
        }
    }

    /// Returns true for skip and failure content.
    #[must_use]
    pub const fn is_sentinel(&self) -> bool {
        matches!(self, Self::Skip | Self::Failure)
    }

    /// Returns the short tag used in log messages.
    #[must_use]
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::Value(_) => "Value",
            Self::Skip => "Skip",
            Self::Failure => "Failure",
        }
    }
}

impl Default for Content {
    fn default() -> Self {
        Self::Value(Payload::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_expand_converts_items() {
        let outcome = Outcome::expand([1, 2, 3]);
        assert_eq!(outcome, Outcome::Expand(vec![json!(1), json!(2), json!(3)]));
    }

    #[test]
    fn test_sentinels() {
        assert!(Outcome::Stop.is_stop());
        assert!(Outcome::Skip.is_sentinel());
        assert!(Outcome::Failure.is_sentinel());
        assert!(!Outcome::value(1).is_sentinel());
        assert!(!Outcome::Expand(vec![]).is_sentinel());
    }

    #[test]
    fn test_default_outcome_is_null_value() {
        assert_eq!(Outcome::default(), Outcome::Value(Payload::Null));
    }

    #[test]
    fn test_content_value() {
        assert_eq!(Content::Value(json!("a")).value(), Some(&json!("a")));
        assert_eq!(Content::Skip.value(), None);
        assert!(Content::Failure.is_sentinel());
        assert_eq!(Content::Failure.tag(), "Failure");
    }

    #[test]
    fn test_outcome_serialization() {
        let json = serde_json::to_value(Outcome::Skip).unwrap();
        assert_eq!(json, json!({"kind": "skip"}));
    }
}
