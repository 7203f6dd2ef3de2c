/// Chat command parsing and dispatch for turn management.
use std::fmt;

use tracing::info;

use crate::directory::EmailDirectory;
use crate::store::PrId;
use crate::turn_store::{TurnStore, TurnStoreError};

/// A parsed chat command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    /// Show whose turn it is
    Turn,
    /// Put the mentioned participants back into the current turn
    Nudge(Vec<String>),
    /// Pin the attention set to exactly the mentioned participants
    Attention(Vec<String>),
    /// Stop automatic turn switching
    Freeze,
    /// Resume automatic turn switching
    Unfreeze,
    /// Show who owns the changed files, with groups unexpanded
    Explain,
    /// Show approval status of the changed files
    Approvals,
}

/// Result of parsing a message for commands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseResult {
    /// The message does not address the bot
    NoMention,
    /// The bot was addressed but the command was not recognized
    UnrecognizedCommand {
        /// The unrecognized command text that was attempted
        attempted: String,
    },
    /// A valid command was found
    Command(ChatCommand),
}

impl fmt::Display for ChatCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatCommand::Turn => write!(f, "turn"),
            ChatCommand::Nudge(mentions) => write!(f, "nudge {}", mentions.join(" ")),
            ChatCommand::Attention(mentions) => write!(f, "attention {}", mentions.join(" ")),
            ChatCommand::Freeze => write!(f, "freeze"),
            ChatCommand::Unfreeze => write!(f, "unfreeze"),
            ChatCommand::Explain => write!(f, "explain"),
            ChatCommand::Approvals => write!(f, "approvals"),
        }
    }
}

/// Strip mention decoration: `@U123`, `<@U123>` and `<@U123|name>` all give `U123`.
fn mention_id(token: &str) -> Option<&str> {
    let token = token
        .strip_prefix('<')
        .and_then(|t| t.strip_suffix('>'))
        .unwrap_or(token);
    let token = token.split('|').next().unwrap_or(token);
    let id = token.trim_start_matches('@');
    (!id.is_empty()).then_some(id)
}

fn mentions(args: &str) -> Vec<String> {
    args.split_whitespace()
        .filter_map(mention_id)
        .map(str::to_string)
        .collect()
}

/// Parse a chat message for commands addressed with `prefix`.
///
/// A command must sit on one line that starts with the prefix (case-insensitive),
/// followed by whitespace and the command word. The first such line decides the
/// result, even when its command is empty or unrecognized.
///
/// # Available Commands
///
/// - `turn`
/// - `nudge <mentions..>`
/// - `attention <mentions..>`
/// - `freeze` / `unfreeze`
/// - `explain`
/// - `approvals`
pub fn parse_command(prefix: &str, body: &str) -> ParseResult {
    for line in body.lines() {
        let trimmed = line.trim();

        // get() keeps non-ASCII input from panicking on a char boundary
        let Some(head) = trimmed.get(..prefix.len()) else {
            continue;
        };
        if !head.eq_ignore_ascii_case(prefix) {
            continue;
        }

        let rest = &trimmed[prefix.len()..];
        if rest.is_empty() {
            return ParseResult::UnrecognizedCommand {
                attempted: String::new(),
            };
        }
        if !rest.starts_with(|c: char| c.is_whitespace()) {
            // e.g. "/reviewbotturn"
            continue;
        }

        let command_part = rest.trim();
        let (command_word, args) = match command_part.split_once(|c: char| c.is_whitespace()) {
            Some((cmd, rest)) => (cmd, rest.trim_start()),
            None => (command_part, ""),
        };

        let command = match command_word.to_ascii_lowercase().as_str() {
            "turn" => ChatCommand::Turn,
            "nudge" => ChatCommand::Nudge(mentions(args)),
            "attention" => ChatCommand::Attention(mentions(args)),
            "freeze" => ChatCommand::Freeze,
            "unfreeze" => ChatCommand::Unfreeze,
            "explain" => ChatCommand::Explain,
            "approvals" => ChatCommand::Approvals,
            _ => {
                return ParseResult::UnrecognizedCommand {
                    attempted: command_word.to_string(),
                }
            }
        };
        return ParseResult::Command(command);
    }

    ParseResult::NoMention
}

/// Outcome of a turn command, ready to be shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandReply {
    CurrentTurn(Vec<String>),
    Nudged {
        nudged: Vec<String>,
        /// Known people who are neither author nor reviewer.
        not_participants: Vec<String>,
        /// Mentions the directory could not resolve.
        unknown: Vec<String>,
    },
    Pinned {
        emails: Vec<String>,
        changed: bool,
        unknown: Vec<String>,
    },
    Frozen {
        by: String,
        /// False when someone had already frozen the PR.
        changed: bool,
    },
    Unfrozen {
        changed: bool,
    },
    /// The command reports on the change set and is answered from ownership data.
    NeedsChangeSet(ChatCommand),
}

impl fmt::Display for CommandReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandReply::CurrentTurn(emails) => write!(f, "Waiting on: {}", emails.join(", ")),
            CommandReply::Nudged {
                nudged,
                not_participants,
                unknown,
            } => {
                if nudged.is_empty() {
                    write!(f, "Nobody was nudged")?;
                } else {
                    write!(f, "Nudged: {}", nudged.join(", "))?;
                }
                if !not_participants.is_empty() {
                    write!(f, "; not on this PR: {}", not_participants.join(", "))?;
                }
                if !unknown.is_empty() {
                    write!(f, "; unknown: {}", unknown.join(", "))?;
                }
                Ok(())
            }
            CommandReply::Pinned {
                emails,
                changed,
                unknown,
            } => {
                if emails.is_empty() {
                    write!(f, "Attention unchanged")?;
                } else if *changed {
                    write!(f, "Attention pinned to: {}", emails.join(", "))?;
                } else {
                    write!(f, "Attention already on: {}", emails.join(", "))?;
                }
                if !unknown.is_empty() {
                    write!(f, "; unknown: {}", unknown.join(", "))?;
                }
                Ok(())
            }
            CommandReply::Frozen { by, changed: true } => write!(f, "Frozen by {}", by),
            CommandReply::Frozen { by, changed: false } => {
                write!(f, "Already frozen by {}", by)
            }
            CommandReply::Unfrozen { changed: true } => write!(f, "Unfrozen"),
            CommandReply::Unfrozen { changed: false } => write!(f, "Not frozen"),
            CommandReply::NeedsChangeSet(command) => {
                write!(f, "`{}` needs the PR's changed files", command)
            }
        }
    }
}

/// Resolve mentions to emails, returning (emails, unresolved mentions).
fn resolve(directory: &dyn EmailDirectory, mentions: &[String]) -> (Vec<String>, Vec<String>) {
    let mut emails = Vec::new();
    let mut unknown = Vec::new();
    for mention in mentions {
        match directory.email_for_platform_id(mention) {
            Some(email) => emails.push(email),
            None => unknown.push(mention.clone()),
        }
    }
    emails.sort();
    emails.dedup();
    (emails, unknown)
}

/// Run a turn command on behalf of `actor` (an email address).
pub async fn execute_command(
    store: &TurnStore,
    directory: &dyn EmailDirectory,
    pr: &PrId,
    actor: &str,
    command: &ChatCommand,
) -> Result<CommandReply, TurnStoreError> {
    info!(pr = %pr, actor, command = %command, "Executing chat command");
    let reply = match command {
        ChatCommand::Turn => CommandReply::CurrentTurn(store.current_turn(pr).await?),
        ChatCommand::Nudge(mentions) => {
            let (emails, unknown) = resolve(directory, mentions);
            let mut nudged = Vec::new();
            let mut not_participants = Vec::new();
            for email in emails {
                if store.nudge(pr, &email).await? {
                    nudged.push(email);
                } else {
                    not_participants.push(email);
                }
            }
            CommandReply::Nudged {
                nudged,
                not_participants,
                unknown,
            }
        }
        ChatCommand::Attention(mentions) => {
            let (emails, unknown) = resolve(directory, mentions);
            let changed = if emails.is_empty() {
                false
            } else {
                store.set_explicit(pr, &emails).await?
            };
            CommandReply::Pinned {
                emails,
                changed,
                unknown,
            }
        }
        ChatCommand::Freeze => {
            let changed = store.freeze(pr, actor).await?;
            let by = store
                .frozen_by(pr)
                .await?
                .unwrap_or_else(|| actor.to_string());
            CommandReply::Frozen { by, changed }
        }
        ChatCommand::Unfreeze => CommandReply::Unfrozen {
            changed: store.unfreeze(pr).await?,
        },
        ChatCommand::Explain | ChatCommand::Approvals => {
            CommandReply::NeedsChangeSet(command.clone())
        }
    };
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::StaticDirectory;
    use crate::store::InMemoryDocumentStore;
    use std::sync::Arc;

    const PREFIX: &str = "/reviewbot";

    fn command(cmd: ChatCommand) -> ParseResult {
        ParseResult::Command(cmd)
    }

    fn unrecognized(attempted: &str) -> ParseResult {
        ParseResult::UnrecognizedCommand {
            attempted: attempted.to_string(),
        }
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_simple_commands() {
        assert_eq!(parse_command(PREFIX, "/reviewbot turn"), command(ChatCommand::Turn));
        assert_eq!(parse_command(PREFIX, "/reviewbot Freeze"), command(ChatCommand::Freeze));
        assert_eq!(
            parse_command(PREFIX, "  /reviewbot unfreeze  "),
            command(ChatCommand::Unfreeze)
        );
        assert_eq!(
            parse_command(PREFIX, "/reviewbot explain"),
            command(ChatCommand::Explain)
        );
        assert_eq!(
            parse_command(PREFIX, "/reviewbot APPROVALS"),
            command(ChatCommand::Approvals)
        );
    }

    #[test]
    fn test_parse_mentions() {
        assert_eq!(
            parse_command(PREFIX, "/reviewbot nudge @U1 <@U2> <@U3|carol>"),
            command(ChatCommand::Nudge(strings(&["U1", "U2", "U3"])))
        );
        assert_eq!(
            parse_command(PREFIX, "/reviewbot attention   @U1"),
            command(ChatCommand::Attention(strings(&["U1"])))
        );
        assert_eq!(
            parse_command(PREFIX, "/reviewbot nudge"),
            command(ChatCommand::Nudge(Vec::new()))
        );
    }

    #[test]
    fn test_no_mention() {
        assert_eq!(parse_command(PREFIX, "just chatting"), ParseResult::NoMention);
        assert_eq!(
            parse_command(PREFIX, "please run /reviewbot turn"),
            ParseResult::NoMention
        );
        assert_eq!(parse_command(PREFIX, "/reviewbotturn"), ParseResult::NoMention);
        assert_eq!(parse_command(PREFIX, "héllo wörld"), ParseResult::NoMention);
    }

    #[test]
    fn test_unrecognized_command() {
        assert_eq!(parse_command(PREFIX, "/reviewbot"), unrecognized(""));
        assert_eq!(parse_command(PREFIX, "/reviewbot trun"), unrecognized("trun"));
    }

    #[test]
    fn test_first_mention_wins() {
        assert_eq!(
            parse_command(PREFIX, "hi\n/reviewbot typo\n/reviewbot turn"),
            unrecognized("typo")
        );
        assert_eq!(
            parse_command(PREFIX, "/reviewbot freeze\n/reviewbot unfreeze"),
            command(ChatCommand::Freeze)
        );
    }

    #[test]
    fn test_custom_prefix_is_case_insensitive() {
        assert_eq!(parse_command("!rb", "!RB turn"), command(ChatCommand::Turn));
    }

    async fn tracked_store() -> (TurnStore, PrId) {
        let store = TurnStore::new(Arc::new(InMemoryDocumentStore::new()));
        let pr = PrId::new("acme", "widgets", 1);
        store
            .init(&pr, "author@x.io", &["r1@x.io", "r2@x.io"])
            .await
            .expect("should track PR");
        (store, pr)
    }

    fn directory() -> StaticDirectory {
        [
            ("UA", "author@x.io"),
            ("U1", "r1@x.io"),
            ("U2", "r2@x.io"),
            ("UX", "outsider@x.io"),
        ]
        .into_iter()
        .collect()
    }

    #[tokio::test]
    async fn test_turn_command() {
        let (store, pr) = tracked_store().await;
        let reply = execute_command(&store, &directory(), &pr, "r1@x.io", &ChatCommand::Turn)
            .await
            .unwrap();
        assert_eq!(
            reply,
            CommandReply::CurrentTurn(strings(&["r1@x.io", "r2@x.io"]))
        );
        assert_eq!(reply.to_string(), "Waiting on: r1@x.io, r2@x.io");
    }

    #[tokio::test]
    async fn test_nudge_reports_unknown_mentions() {
        let (store, pr) = tracked_store().await;
        store.switch(&pr, "r1@x.io").await.unwrap();

        let nudge = ChatCommand::Nudge(strings(&["U1", "UX", "U404"]));
        let reply = execute_command(&store, &directory(), &pr, "author@x.io", &nudge)
            .await
            .unwrap();
        assert_eq!(
            reply,
            CommandReply::Nudged {
                nudged: strings(&["r1@x.io"]),
                not_participants: strings(&["outsider@x.io"]),
                unknown: strings(&["U404"]),
            }
        );
        assert!(store
            .current_turn(&pr)
            .await
            .unwrap()
            .contains(&"r1@x.io".to_string()));
    }

    #[tokio::test]
    async fn test_attention_pins() {
        let (store, pr) = tracked_store().await;
        let pin = ChatCommand::Attention(strings(&["U2"]));
        let reply = execute_command(&store, &directory(), &pr, "author@x.io", &pin)
            .await
            .unwrap();
        assert!(matches!(reply, CommandReply::Pinned { changed: true, .. }));
        assert_eq!(
            store.current_turn(&pr).await.unwrap(),
            strings(&["r2@x.io"])
        );
    }

    #[tokio::test]
    async fn test_attention_with_only_unknown_mentions_changes_nothing() {
        let (store, pr) = tracked_store().await;
        let pin = ChatCommand::Attention(strings(&["U404"]));
        let reply = execute_command(&store, &directory(), &pr, "author@x.io", &pin)
            .await
            .unwrap();
        assert_eq!(
            reply,
            CommandReply::Pinned {
                emails: Vec::new(),
                changed: false,
                unknown: strings(&["U404"]),
            }
        );
        assert!(!store.document(&pr).await.unwrap().unwrap().is_explicit());
    }

    #[tokio::test]
    async fn test_freeze_keeps_first_freezer() {
        let (store, pr) = tracked_store().await;
        let first = execute_command(&store, &directory(), &pr, "r1@x.io", &ChatCommand::Freeze)
            .await
            .unwrap();
        assert_eq!(first.to_string(), "Frozen by r1@x.io");

        let second = execute_command(&store, &directory(), &pr, "r2@x.io", &ChatCommand::Freeze)
            .await
            .unwrap();
        assert_eq!(
            second,
            CommandReply::Frozen {
                by: "r1@x.io".to_string(),
                changed: false
            }
        );

        let unfreeze =
            execute_command(&store, &directory(), &pr, "r2@x.io", &ChatCommand::Unfreeze)
                .await
                .unwrap();
        assert_eq!(unfreeze, CommandReply::Unfrozen { changed: true });
    }

    #[tokio::test]
    async fn test_report_commands_need_change_set() {
        let (store, pr) = tracked_store().await;
        let reply = execute_command(&store, &directory(), &pr, "r1@x.io", &ChatCommand::Explain)
            .await
            .unwrap();
        assert_eq!(reply, CommandReply::NeedsChangeSet(ChatCommand::Explain));
    }

    #[tokio::test]
    async fn test_untracked_pr() {
        let store = TurnStore::new(Arc::new(InMemoryDocumentStore::new()));
        let pr = PrId::new("acme", "widgets", 9);
        let err = execute_command(&store, &directory(), &pr, "a@x.io", &ChatCommand::Turn)
            .await
            .unwrap_err();
        assert!(matches!(err, TurnStoreError::NotTracked(_)));
    }
}
