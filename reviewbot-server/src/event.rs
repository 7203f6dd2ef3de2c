//! Inbound events that move turn state.
//!
//! Events are already decoded and carry normalized-or-not participant emails;
//! platform identifiers must be translated before an event is built.

/// Things that happened on a tracked pull request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnEvent {
    /// The PR started being tracked.
    Opened {
        author: String,
        reviewers: Vec<String>,
    },

    /// A reviewer was assigned.
    ReviewerAdded { reviewer: String },

    /// A reviewer was unassigned.
    ReviewerRemoved { reviewer: String },

    /// A reviewer approved; they no longer need to act.
    Approved { reviewer: String },

    /// Someone commented, pushed or otherwise acted on the PR.
    Activity { actor: String },

    /// The PR was merged or closed; tracking ends.
    Closed,
}

impl TurnEvent {
    /// Short description for logging.
    pub fn log_summary(&self) -> String {
        match self {
            TurnEvent::Opened { author, reviewers } => {
                format!(
                    "Opened {{ author: {}, reviewers: {} }}",
                    author,
                    reviewers.len()
                )
            }
            TurnEvent::ReviewerAdded { reviewer } => format!("ReviewerAdded({})", reviewer),
            TurnEvent::ReviewerRemoved { reviewer } => format!("ReviewerRemoved({})", reviewer),
            TurnEvent::Approved { reviewer } => format!("Approved({})", reviewer),
            TurnEvent::Activity { actor } => format!("Activity({})", actor),
            TurnEvent::Closed => "Closed".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_summary_does_not_list_reviewers() {
        let event = TurnEvent::Opened {
            author: "a@x.io".to_string(),
            reviewers: vec!["r1@x.io".to_string(), "r2@x.io".to_string()],
        };
        assert_eq!(event.log_summary(), "Opened { author: a@x.io, reviewers: 2 }");
        assert_eq!(TurnEvent::Closed.log_summary(), "Closed");
    }
}
