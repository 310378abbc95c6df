//! Dirtiness classification for recipes.
//!
//! A recipe is clean ([`Status::Ok`]) when its cached outputs can be reused;
//! otherwise it is dirty with a classifying reason. When several causes hold
//! at once, the highest-priority one is surfaced.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The dirtiness classification of a single recipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Cached outputs are valid and can be reused.
    Ok,
    /// No evaluation record exists (never brewed, cache disabled, or the
    /// cache metadata was unreadable).
    NotEvaluatedYet,
    /// The installed cleanliness predicate returned false.
    CustomDirty,
    /// An ingredient is dirty or an ingredient's outputs changed since the
    /// last evaluation.
    InputsChanged,
    /// The bound function's fingerprint changed since the last evaluation.
    BoundFunctionChanged,
    /// Persisted outputs no longer match their recorded checksums (an
    /// external file was edited, or a sidecar blob is gone).
    OutputsInvalid,
}

impl Status {
    /// Priority used when several causes hold at once; higher wins.
    pub fn priority(self) -> u8 {
        match self {
            Status::Ok => 0,
            Status::NotEvaluatedYet => 1,
            Status::CustomDirty => 2,
            Status::InputsChanged => 3,
            Status::BoundFunctionChanged => 4,
            Status::OutputsInvalid => 5,
        }
    }

    /// Anything other than [`Status::Ok`] requires work.
    pub fn is_dirty(self) -> bool {
        !matches!(self, Status::Ok)
    }

    /// Picks the highest-priority cause, or `Ok` when no cause holds.
    pub fn combine<I: IntoIterator<Item = Status>>(causes: I) -> Status {
        causes
            .into_iter()
            .max_by_key(|s| s.priority())
            .unwrap_or(Status::Ok)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Status::Ok => "ok",
            Status::NotEvaluatedYet => "not evaluated yet",
            Status::CustomDirty => "custom cleanliness failed",
            Status::InputsChanged => "inputs changed",
            Status::BoundFunctionChanged => "bound function changed",
            Status::OutputsInvalid => "outputs invalid",
        };
        f.write_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_order() {
        let ordered = [
            Status::Ok,
            Status::NotEvaluatedYet,
            Status::CustomDirty,
            Status::InputsChanged,
            Status::BoundFunctionChanged,
            Status::OutputsInvalid,
        ];
        for pair in ordered.windows(2) {
            assert!(pair[0].priority() < pair[1].priority());
        }
    }

    #[test]
    fn combine_picks_highest_priority() {
        let status = Status::combine([Status::InputsChanged, Status::OutputsInvalid]);
        assert_eq!(status, Status::OutputsInvalid);

        assert_eq!(Status::combine([]), Status::Ok);
    }

    #[test]
    fn only_ok_is_clean() {
        assert!(!Status::Ok.is_dirty());
        assert!(Status::NotEvaluatedYet.is_dirty());
        assert!(Status::OutputsInvalid.is_dirty());
    }
}
