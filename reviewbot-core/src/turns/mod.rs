//! Turn-taking rules for a single pull request.
//!
//! A [`PrTurn`] records the author, each reviewer with a flag saying whether it
//! is currently their turn, and three overrides: an explicit pin of the attention
//! set, a freeze that suspends automatic switching, and nudges that force someone
//! into the current turn until they act. [`PrTurn::current_turn`]
//! derives who needs to act from that state.

mod document;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::email::{is_placeholder, normalize};
use document::TurnDocument;

/// How the reviewer flags were last set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Attention {
    /// Flags follow from participant activity.
    #[default]
    Derived,
    /// Flags were pinned by an explicit override.
    Pinned,
}

/// Turn state of one tracked pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "TurnDocument", into = "TurnDocument")]
pub struct PrTurn {
    author: String,
    reviewers: BTreeMap<String, bool>,
    attention: Attention,
    frozen_by: Option<String>,
    author_nudged: bool,
    /// Reviewers forced into the current turn regardless of their flag.
    nudged: BTreeSet<String>,
}

impl PrTurn {
    /// Start tracking a pull request. Listed reviewers begin with the turn.
    pub fn new<I, S>(author: &str, reviewers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut turn = Self {
            author: normalize(author),
            reviewers: BTreeMap::new(),
            attention: Attention::Derived,
            frozen_by: None,
            author_nudged: false,
            nudged: BTreeSet::new(),
        };
        for reviewer in reviewers {
            turn.add_reviewer(reviewer.as_ref());
        }
        turn
    }

    pub fn author(&self) -> &str {
        &self.author
    }

    /// Reviewers with their turn flag.
    pub fn reviewers(&self) -> &BTreeMap<String, bool> {
        &self.reviewers
    }

    pub fn is_reviewer(&self, email: &str) -> bool {
        self.reviewers.contains_key(&normalize(email))
    }

    pub fn attention(&self) -> Attention {
        self.attention
    }

    pub fn is_explicit(&self) -> bool {
        self.attention == Attention::Pinned
    }

    pub fn frozen_by(&self) -> Option<&str> {
        self.frozen_by.as_deref()
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen_by.is_some()
    }

    /// Add a reviewer whose turn it now is. Returns false if nothing changed.
    pub fn add_reviewer(&mut self, email: &str) -> bool {
        if is_placeholder(email) {
            return false;
        }
        let email = normalize(email);
        if email == self.author || self.reviewers.contains_key(&email) {
            return false;
        }
        self.reviewers.insert(email, true);
        true
    }

    /// Stop tracking a reviewer, e.g. after they approve or are unassigned.
    /// Not affected by a freeze.
    pub fn remove_reviewer(&mut self, email: &str) -> bool {
        if is_placeholder(email) {
            return false;
        }
        let email = normalize(email);
        self.nudged.remove(&email);
        self.reviewers.remove(&email).is_some()
    }

    /// Pin attention on `emails`: they get the turn (reviewers are added if new)
    /// and every other reviewer loses it but stays tracked. Earlier nudges are
    /// replaced by the pin.
    pub fn set_explicit<I, S>(&mut self, emails: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let before = self.clone();
        let pinned: BTreeSet<String> = emails
            .into_iter()
            .filter(|email| !is_placeholder(email.as_ref()))
            .map(|email| normalize(email.as_ref()))
            .collect();

        for (reviewer, turn) in self.reviewers.iter_mut() {
            *turn = pinned.contains(reviewer);
        }
        self.author_nudged = false;
        self.nudged.clear();
        for email in pinned {
            if email == self.author {
                self.author_nudged = true;
            } else {
                self.reviewers.insert(email, true);
            }
        }
        self.attention = Attention::Pinned;
        *self != before
    }

    /// Record that `email` acted on the pull request.
    ///
    /// When the author acts, every reviewer gets the turn. When a reviewer acts,
    /// their turn ends. Either way the nudge on whoever flipped is cleared.
    /// Does nothing while frozen or for unknown participants.
    pub fn switch(&mut self, email: &str) -> bool {
        if self.is_frozen() {
            return false;
        }
        let email = normalize(email);
        if email == self.author {
            self.author_nudged = false;
            self.nudged.clear();
            for turn in self.reviewers.values_mut() {
                *turn = true;
            }
        } else if let Some(turn) = self.reviewers.get_mut(&email) {
            *turn = false;
            self.nudged.remove(&email);
        } else {
            return false;
        }
        self.attention = Attention::Derived;
        true
    }

    /// Suspend automatic switching. Returns false if already frozen, or if `by`
    /// is blank.
    pub fn freeze(&mut self, by: &str) -> bool {
        let by = normalize(by);
        if self.is_frozen() || by.is_empty() {
            return false;
        }
        self.frozen_by = Some(by);
        true
    }

    /// Resume automatic switching. Returns false if not frozen.
    pub fn unfreeze(&mut self) -> bool {
        self.frozen_by.take().is_some()
    }

    /// Force `email` into the current turn until they act. Works while frozen
    /// and leaves every turn flag alone.
    ///
    /// Returns false, without changing anything, if `email` is neither the author
    /// nor a reviewer.
    pub fn nudge(&mut self, email: &str) -> bool {
        let email = normalize(email);
        if email == self.author {
            self.author_nudged = true;
            return true;
        }
        if !self.reviewers.contains_key(&email) {
            return false;
        }
        self.nudged.insert(email);
        true
    }

    /// Reviewers currently forced in by a nudge.
    pub fn nudged(&self) -> &BTreeSet<String> {
        &self.nudged
    }

    /// Everyone whose attention is required right now: sorted, unique, never empty.
    pub fn current_turn(&self) -> Vec<String> {
        if self.reviewers.is_empty() {
            return vec![self.author.clone()];
        }

        let mut turn: BTreeSet<&str> = self
            .reviewers
            .iter()
            .filter(|(_, turn)| **turn)
            .map(|(email, _)| email.as_str())
            .chain(self.nudged.iter().map(String::as_str))
            .collect();

        let someone_waiting = self.reviewers.values().any(|turn| !turn);
        let author_included = match self.attention {
            Attention::Derived => someone_waiting,
            Attention::Pinned => false,
        };
        if author_included || self.author_nudged || turn.is_empty() {
            turn.insert(&self.author);
        }

        turn.into_iter().map(str::to_string).collect()
    }
}
