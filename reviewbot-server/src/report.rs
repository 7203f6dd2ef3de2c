//! Reports that combine ownership and high-risk data for a change set.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use reviewbot_core::{HighRiskList, OwnersPerPath, OwnershipTable};
use serde::Serialize;

/// Approval state of one changed file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PathApproval {
    pub path: String,
    /// Owners with groups expanded to individuals.
    pub owners: Vec<String>,
    pub satisfied: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApprovalReport {
    pub paths: Vec<PathApproval>,
    pub high_risk_files: usize,
    pub ready_to_merge: bool,
}

impl ApprovalReport {
    pub fn build<S: AsRef<str>>(
        table: &OwnershipTable,
        high_risk: &HighRiskList,
        paths: &[S],
        approvers: &[String],
    ) -> Self {
        let per_path = paths
            .iter()
            .map(|path| {
                let path = path.as_ref();
                PathApproval {
                    path: path.to_string(),
                    owners: table.flattened_owners(path),
                    satisfied: table.all_approved(approvers, table.owners(path), true),
                }
            })
            .collect();

        Self {
            paths: per_path,
            high_risk_files: high_risk.count_high_risk_files(paths),
            ready_to_merge: table.got_all_required_approvals(paths, approvers),
        }
    }

    /// Paths still waiting on an owner.
    pub fn pending(&self) -> impl Iterator<Item = &PathApproval> {
        self.paths.iter().filter(|path| !path.satisfied)
    }
}

impl fmt::Display for ApprovalReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for path in &self.paths {
            let mark = if path.satisfied { "ok" } else { "pending" };
            let owners = if path.owners.is_empty() {
                "(no owners)".to_string()
            } else {
                path.owners.join(", ")
            };
            writeln!(f, "[{}] {}: {}", mark, path.path, owners)?;
        }
        if self.high_risk_files > 0 {
            writeln!(f, "High-risk files: {}", self.high_risk_files)?;
        }
        write!(
            f,
            "{}",
            if self.ready_to_merge {
                "Ready to merge"
            } else {
                "Not ready to merge"
            }
        )
    }
}

/// Owners of each path as written, with the group declarations they refer to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Explanation(pub OwnersPerPath);

pub fn explain<S: AsRef<str>>(table: &OwnershipTable, paths: &[S]) -> Explanation {
    Explanation(table.owners_per_path(paths, false))
}

impl fmt::Display for Explanation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (path, owners) in &self.0.owners {
            writeln!(f, "{}: {}", path, owners.join(" "))?;
        }
        let Some(groups) = &self.0.groups else {
            return Ok(());
        };

        // Every group reachable from the listed owners, nested ones included
        let mut referenced: BTreeSet<&str> = BTreeSet::new();
        let mut pending: Vec<&str> = self
            .0
            .owners
            .values()
            .flatten()
            .map(String::as_str)
            .filter(|owner| owner.starts_with('@'))
            .collect();
        while let Some(group) = pending.pop() {
            if !referenced.insert(group) {
                continue;
            }
            if let Some(members) = groups.get(group) {
                pending.extend(
                    members
                        .iter()
                        .map(String::as_str)
                        .filter(|member| member.starts_with('@')),
                );
            }
        }

        for group in referenced {
            if let Some(members) = groups.get(group) {
                writeln!(f, "{} = {}", group, members.join(" "))?;
            }
        }
        Ok(())
    }
}

/// Whether `reviewer` can leave the PR without blocking it.
///
/// True when they own none of `paths`, or when every path they own is already
/// approved without them.
pub fn can_drop_reviewer<S: AsRef<str>>(
    table: &OwnershipTable,
    reviewer: &str,
    paths: &[S],
    approvers: &[String],
) -> bool {
    let others: Vec<String> = approvers
        .iter()
        .filter(|approver| approver.as_str() != reviewer)
        .cloned()
        .collect();

    paths
        .iter()
        .map(|path| path.as_ref())
        .filter(|path| table.flattened_owners(path).iter().any(|o| o == reviewer))
        .all(|path| table.all_approved(&others, table.owners(path), true))
}

/// How many of `paths` each reviewer owns.
pub fn owned_file_counts<R: AsRef<str>, S: AsRef<str>>(
    table: &OwnershipTable,
    reviewers: &[R],
    paths: &[S],
) -> BTreeMap<String, usize> {
    reviewers
        .iter()
        .map(|reviewer| {
            let reviewer = reviewer.as_ref();
            (reviewer.to_string(), table.count_owned_files(reviewer, paths))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const CODEOWNERS: &str = "\
@@@Backend @alice @bob
@@@FallbackOwners @root
/src/ @@Backend
/docs/ @carol
/src/billing/ @dave @@Backend
";

    fn table() -> OwnershipTable {
        OwnershipTable::parse(CODEOWNERS).expect("CODEOWNERS should parse")
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_approval_report() {
        let high_risk = HighRiskList::parse("src/billing/\n");
        let paths = ["src/lib.rs", "src/billing/invoice.rs", "docs/guide.md"];
        let report = ApprovalReport::build(&table(), &high_risk, &paths, &strings(&["bob"]));

        assert_eq!(report.high_risk_files, 1);
        assert!(!report.ready_to_merge);
        assert_eq!(
            report.paths[1],
            PathApproval {
                path: "src/billing/invoice.rs".to_string(),
                owners: strings(&["alice", "bob", "dave"]),
                satisfied: false,
            }
        );
        let pending: Vec<&str> = report.pending().map(|p| p.path.as_str()).collect();
        assert_eq!(pending, vec!["src/billing/invoice.rs", "docs/guide.md"]);
    }

    #[test]
    fn test_fallback_owner_makes_report_ready() {
        let paths = ["src/lib.rs", "docs/guide.md"];
        let report = ApprovalReport::build(
            &table(),
            &HighRiskList::default(),
            &paths,
            &strings(&["root"]),
        );
        assert!(report.ready_to_merge);
        assert!(report.to_string().ends_with("Ready to merge"));
    }

    #[test]
    fn test_empty_change_set_is_not_ready() {
        let paths: [&str; 0] = [];
        let report =
            ApprovalReport::build(&table(), &HighRiskList::default(), &paths, &strings(&["root"]));
        assert!(!report.ready_to_merge);
    }

    #[test]
    fn test_explain_lists_referenced_groups() {
        let explanation = explain(&table(), &["src/main.rs"]);
        assert_eq!(
            explanation.0.owners["src/main.rs"],
            strings(&["@Backend"])
        );
        assert_eq!(
            explanation.to_string(),
            "src/main.rs: @Backend\n@Backend = alice bob\n"
        );
    }

    #[test]
    fn test_explain_follows_nested_groups() {
        let table = OwnershipTable::parse(
            "@@@Core @@Leads @erin\n@@@Leads @frank\n@@@Unused @gina\n/lib/ @@Core\n",
        )
        .expect("CODEOWNERS should parse");
        assert_eq!(
            explain(&table, &["lib/a.rs"]).to_string(),
            "lib/a.rs: @Core\n@Core = @Leads erin\n@Leads = frank\n"
        );
    }

    #[test]
    fn test_can_drop_reviewer() {
        let table = table();
        let paths = ["src/lib.rs", "docs/guide.md"];

        // Owns nothing here
        assert!(can_drop_reviewer(&table, "dave", &paths, &[]));
        // Sole owner of docs
        assert!(!can_drop_reviewer(&table, "carol", &paths, &strings(&["carol"])));
        // Backend is covered by bob
        let approvers = strings(&["bob", "carol"]);
        assert!(can_drop_reviewer(&table, "alice", &["src/lib.rs"], &approvers));
        // Their own approval stops counting once they leave
        assert!(!can_drop_reviewer(&table, "bob", &["src/lib.rs"], &strings(&["bob"])));
    }

    #[test]
    fn test_owned_file_counts() {
        let paths = ["src/lib.rs", "src/billing/a.rs", "docs/x.md"];
        let counts = owned_file_counts(&table(), &["alice", "dave", "zed"], &paths);
        assert_eq!(counts["alice"], 2);
        assert_eq!(counts["dave"], 1);
        assert_eq!(counts["zed"], 0);
    }
}
