//! Ownership resolution from CODEOWNERS-style documents.
//!
//! The format is the usual `pattern owner...` syntax with two local extensions:
//!
//! - `@@@Name member...` declares the group `@Name`. Members may be individuals
//!   (`@alice`, `@"Alice Liddell"`) or other groups (`@@Other`).
//! - `!pattern` marks matching paths as ownerless.
//!
//! The last matching path line in the file wins. Members of the reserved
//! [`FALLBACK_OWNERS`] group can approve any file on their own.

mod error;
mod parse;

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;
use tracing::debug;

pub use error::OwnershipError;
use parse::{is_group, parse_line, Line, PathRule};

/// Reserved group whose members can satisfy any approval requirement.
pub const FALLBACK_OWNERS: &str = "@FallbackOwners";

/// Parsed and validated ownership rules for one revision of a repository.
///
/// Built fresh for every query and owned by the caller.
#[derive(Debug, Clone, Default)]
pub struct OwnershipTable {
    /// Path rules, highest priority (last in the file) first.
    path_list: Vec<PathRule>,
    path_owners: HashMap<String, Vec<String>>,
    ignore_list: Vec<PathRule>,
    /// Groups as declared, members unexpanded.
    groups: BTreeMap<String, Vec<String>>,
    /// Flattened, sorted and deduplicated members of every group.
    members: BTreeMap<String, Vec<String>>,
    users: BTreeSet<String>,
}

/// Owners for a set of paths, as returned by [`OwnershipTable::owners_per_path`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OwnersPerPath {
    pub owners: BTreeMap<String, Vec<String>>,
    /// Declared groups, present only for unflattened results so that callers can
    /// explain where a group's members come from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub groups: Option<BTreeMap<String, Vec<String>>>,
}

impl OwnershipTable {
    /// Parse a CODEOWNERS document and expand every group it declares.
    ///
    /// Empty text yields an empty table: nothing is owned by anyone.
    pub fn parse(text: &str) -> Result<Self, OwnershipError> {
        let mut table = Self::default();
        let mut path_order: Vec<String> = Vec::new();

        for line in text.lines().filter_map(parse_line) {
            match line {
                Line::Group { name, members } => {
                    table.groups.entry(name).or_default().extend(members);
                }
                Line::Ignore { pattern } => {
                    table.ignore_list.push(PathRule::compile(pattern)?);
                }
                Line::Path { pattern, owners } => {
                    path_order.retain(|existing| existing != &pattern);
                    path_order.push(pattern.clone());
                    table.path_owners.entry(pattern).or_default().extend(owners);
                }
            }
        }

        table.path_list = path_order
            .into_iter()
            .rev()
            .map(PathRule::compile)
            .collect::<Result<_, _>>()?;
        table.expand_groups()?;

        debug!(
            paths = table.path_list.len(),
            ignores = table.ignore_list.len(),
            groups = table.groups.len(),
            users = table.users.len(),
            "Parsed CODEOWNERS"
        );
        Ok(table)
    }

    pub fn is_empty(&self) -> bool {
        self.path_list.is_empty() && self.ignore_list.is_empty()
    }

    /// Individuals that own something, directly or through a group.
    pub fn users(&self) -> &BTreeSet<String> {
        &self.users
    }

    /// Groups as declared in the document.
    pub fn groups(&self) -> &BTreeMap<String, Vec<String>> {
        &self.groups
    }

    /// Flattened members of a group, if it is declared.
    pub fn group_members(&self, group: &str) -> Option<&[String]> {
        self.members.get(group).map(Vec::as_slice)
    }

    /// Expand every group into individuals, memoizing the result per group.
    ///
    /// Running this again over an already expanded table produces the same members.
    pub fn expand_groups(&mut self) -> Result<(), OwnershipError> {
        self.members.clear();
        self.users.clear();

        let names: Vec<String> = self.groups.keys().cloned().collect();
        for name in &names {
            self.expand_group(name, &mut Vec::new())?;
        }

        let owners: Vec<String> = self.path_owners.values().flatten().cloned().collect();
        for owner in &owners {
            self.expand_token(owner, &mut Vec::new())?;
        }
        Ok(())
    }

    fn expand_token(
        &mut self,
        token: &str,
        stack: &mut Vec<String>,
    ) -> Result<Vec<String>, OwnershipError> {
        if is_group(token) {
            return self.expand_group(token, stack);
        }
        self.users.insert(token.to_string());
        Ok(vec![token.to_string()])
    }

    fn expand_group(
        &mut self,
        name: &str,
        stack: &mut Vec<String>,
    ) -> Result<Vec<String>, OwnershipError> {
        if let Some(done) = self.members.get(name) {
            return Ok(done.clone());
        }
        if stack.iter().any(|pending| pending == name) {
            return Err(OwnershipError::CyclicGroup {
                group: name.to_string(),
            });
        }
        let declared = self
            .groups
            .get(name)
            .cloned()
            .ok_or_else(|| OwnershipError::UndefinedGroup {
                group: name.to_string(),
            })?;

        stack.push(name.to_string());
        let mut flat = Vec::new();
        for member in &declared {
            flat.extend(self.expand_token(member, stack)?);
        }
        stack.pop();

        flat.sort();
        flat.dedup();
        self.members.insert(name.to_string(), flat.clone());
        Ok(flat)
    }

    /// Owner tokens (individuals and `@group` references) of the highest-priority
    /// rule matching `path`. Ignored and unmatched paths have no owners.
    pub fn owners(&self, path: &str) -> &[String] {
        let path: Cow<'_, str> = if path.starts_with('/') {
            Cow::Borrowed(path)
        } else {
            Cow::Owned(format!("/{path}"))
        };

        if self.ignore_list.iter().any(|rule| rule.matches(&path)) {
            return &[];
        }
        self.path_list
            .iter()
            .find(|rule| rule.matches(&path))
            .and_then(|rule| self.path_owners.get(&rule.pattern))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Owners of `path` with every group replaced by its members.
    pub fn flattened_owners(&self, path: &str) -> Vec<String> {
        self.flatten(self.owners(path))
    }

    fn flatten(&self, owners: &[String]) -> Vec<String> {
        let mut flat: Vec<String> = owners
            .iter()
            .flat_map(|owner| {
                if is_group(owner) {
                    self.members.get(owner).cloned().unwrap_or_default()
                } else {
                    vec![owner.clone()]
                }
            })
            .collect();
        flat.sort();
        flat.dedup();
        flat
    }

    /// Whether `approvers` satisfy `owners`.
    ///
    /// An individual entry needs that person's approval; a group entry needs an
    /// approval from any one of its members. With `need_all` every entry must be
    /// satisfied (and a single fallback owner is enough), otherwise any one will do.
    pub fn all_approved(&self, approvers: &[String], owners: &[String], need_all: bool) -> bool {
        let approved = |name: &str| approvers.iter().any(|approver| approver == name);

        if need_all {
            if let Some(fallback) = self.members.get(FALLBACK_OWNERS) {
                if fallback.iter().any(|member| approved(member)) {
                    return true;
                }
            }
        }

        let mut satisfied = owners.iter().map(|owner| {
            if is_group(owner) {
                self.members
                    .get(owner)
                    .is_some_and(|members| members.iter().any(|member| approved(member)))
            } else {
                approved(owner)
            }
        });

        if need_all {
            satisfied.all(|ok| ok)
        } else {
            satisfied.any(|ok| ok)
        }
    }

    /// Number of `paths` that `user` owns, directly or through a group.
    pub fn count_owned_files<S: AsRef<str>>(&self, user: &str, paths: &[S]) -> usize {
        if !self.users.contains(user) {
            return 0;
        }
        paths
            .iter()
            .filter(|path| {
                self.flattened_owners(path.as_ref())
                    .iter()
                    .any(|owner| owner == user)
            })
            .count()
    }

    /// True when every path has the approvals its owners require.
    /// An empty change set is never considered approved.
    pub fn got_all_required_approvals<S: AsRef<str>>(
        &self,
        paths: &[S],
        approvers: &[String],
    ) -> bool {
        !paths.is_empty()
            && paths
                .iter()
                .all(|path| self.all_approved(approvers, self.owners(path.as_ref()), true))
    }

    /// Owners of each path, flattened to individuals or as written.
    pub fn owners_per_path<S: AsRef<str>>(&self, paths: &[S], flatten: bool) -> OwnersPerPath {
        let owners = paths
            .iter()
            .map(|path| {
                let path = path.as_ref();
                let owners = if flatten {
                    self.flattened_owners(path)
                } else {
                    self.owners(path).to_vec()
                };
                (path.to_string(), owners)
            })
            .collect();

        OwnersPerPath {
            owners,
            groups: (!flatten).then(|| self.groups.clone()),
        }
    }
}
