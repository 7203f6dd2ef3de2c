//! Persisted shape of a turn document.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::{Attention, PrTurn};
use crate::email::{is_placeholder, normalize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(super) struct TurnDocument {
    author: String,
    #[serde(default)]
    reviewers: BTreeMap<String, bool>,
    #[serde(default)]
    explicit: bool,
    /// Empty when not frozen.
    #[serde(default)]
    frozen_by: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    author_nudged: bool,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    nudged: BTreeSet<String>,
}

impl From<TurnDocument> for PrTurn {
    fn from(doc: TurnDocument) -> Self {
        let author = normalize(&doc.author);
        let mut reviewers = BTreeMap::new();
        let mut author_nudged = doc.author_nudged;
        for (email, turn) in doc.reviewers {
            if is_placeholder(&email) {
                continue;
            }
            let email = normalize(&email);
            if email == author {
                author_nudged |= turn;
                continue;
            }
            let entry = reviewers.entry(email).or_insert(false);
            *entry |= turn;
        }

        // Nudges only make sense for reviewers that are still tracked.
        let nudged = doc
            .nudged
            .iter()
            .map(|email| normalize(email))
            .filter(|email| reviewers.contains_key(email))
            .collect();

        let frozen_by = Some(normalize(&doc.frozen_by)).filter(|by| !by.is_empty());

        PrTurn {
            author,
            reviewers,
            attention: if doc.explicit {
                Attention::Pinned
            } else {
                Attention::Derived
            },
            frozen_by,
            author_nudged,
            nudged,
        }
    }
}

impl From<PrTurn> for TurnDocument {
    fn from(turn: PrTurn) -> Self {
        TurnDocument {
            author: turn.author,
            reviewers: turn.reviewers,
            explicit: turn.attention == Attention::Pinned,
            frozen_by: turn.frozen_by.unwrap_or_default(),
            author_nudged: turn.author_nudged,
            nudged: turn.nudged,
        }
    }
}
