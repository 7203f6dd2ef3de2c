use thiserror::Error;

/// Reasons a CODEOWNERS document cannot be turned into an ownership table.
#[derive(Debug, Error)]
pub enum OwnershipError {
    /// An owner or group member refers to a group that is never declared.
    #[error("undefined group reference: {group}")]
    UndefinedGroup { group: String },

    /// A group contains itself, directly or through other groups.
    #[error("group {group} refers back to itself")]
    CyclicGroup { group: String },

    /// A path or ignore line is not a valid glob.
    #[error("invalid path pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },
}

impl OwnershipError {
    /// Group problems mean the file is unusable as a whole. Callers treat such a
    /// file as absent instead of failing the surrounding operation.
    pub fn is_malformed_groups(&self) -> bool {
        matches!(
            self,
            Self::UndefinedGroup { .. } | Self::CyclicGroup { .. }
        )
    }
}
