//! # Conflict Classifier
//!
//! Decides whether a datastore failure is a genuine concurrency conflict or
//! an unrelated error. This is the only place that knows how the datastore
//! spells "could not serialize"; swapping drivers means swapping the
//! [`ConflictClassifier`] implementation and nothing else.

use serde::Serialize;

use crate::store::StoreError;

/// The two possible readings of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureClass {
    Conflict,
    Error,
}

/// Pure mapping from a datastore failure to a [`FailureClass`].
///
/// Implementations must be total and must not depend on transaction state.
pub trait ConflictClassifier: Send + Sync + 'static {
    fn classify(&self, error: &StoreError) -> FailureClass;
}

/// Classifies by SQLSTATE: `40001` (serialization_failure) is a conflict,
/// every other code is an error.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlStateClassifier;

impl ConflictClassifier for SqlStateClassifier {
    fn classify(&self, error: &StoreError) -> FailureClass {
        if error.is_serialization_failure() {
            FailureClass::Conflict
        } else {
            FailureClass::Error
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqlState;

    #[test]
    fn test_serialization_failure_is_conflict() {
        let classifier = SqlStateClassifier;
        let err = StoreError::serialization_failure("could not serialize access due to concurrent update");
        assert_eq!(classifier.classify(&err), FailureClass::Conflict);

        let from_driver = StoreError::new(SqlState::new("40001"), "driver spelled it");
        assert_eq!(classifier.classify(&from_driver), FailureClass::Conflict);
    }

    #[test]
    fn test_every_other_code_is_error() {
        let classifier = SqlStateClassifier;
        let codes = [
            SqlState::DEADLOCK_DETECTED,
            SqlState::CONNECTION_DOES_NOT_EXIST,
            SqlState::CONNECTION_FAILURE,
            SqlState::NO_DATA_FOUND,
            SqlState::FOREIGN_KEY_VIOLATION,
            SqlState::INTERNAL_ERROR,
            SqlState::new("4000"),
            SqlState::new(""),
        ];
        for code in codes {
            let err = StoreError::new(code.clone(), "boom");
            assert_eq!(classifier.classify(&err), FailureClass::Error, "code {code}");
        }
    }
}
