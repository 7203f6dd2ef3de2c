use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use reviewbot_core::{HighRiskList, OwnershipTable, PrTurn};
use reviewbot_server::command::{execute_command, parse_command, ChatCommand, CommandReply};
use reviewbot_server::config::Config;
use reviewbot_server::report::{explain, owned_file_counts, ApprovalReport};
use reviewbot_server::source::ownership_from_text;
use reviewbot_server::store::SqliteDocumentStore;
use reviewbot_server::{ParseResult, PrId, StaticDirectory, TurnStore};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// reviewbot: code ownership and review turn tracking
#[derive(Parser, Debug)]
#[command(name = "reviewbot")]
#[command(about = "Code ownership and review turn tracking", long_about = None)]
struct Cli {
    /// Directory holding the state database (overrides REVIEWBOT_STATE_DIR)
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show who owns each path
    Owners(OwnersArgs),
    /// Count paths under a high-risk prefix
    HighRisk(HighRiskArgs),
    /// Check whether a change set has every required approval
    Approvals(ApprovalsArgs),
    /// Inspect or change the turn state of a pull request
    Turn(TurnArgs),
    /// List pull requests with turn state
    Tracked,
    /// Run a chat command against a pull request
    Chat(ChatArgs),
}

#[derive(Parser, Debug)]
struct OwnersArgs {
    /// CODEOWNERS file (defaults to REVIEWBOT_CODEOWNERS_PATH)
    #[arg(long)]
    codeowners: Option<PathBuf>,

    /// Expand groups into their members
    #[arg(long)]
    flatten: bool,

    /// Print JSON instead of text
    #[arg(long)]
    json: bool,

    /// Paths to look up
    #[arg(required = true)]
    paths: Vec<String>,
}

#[derive(Parser, Debug)]
struct HighRiskArgs {
    /// High-risk prefix list (defaults to REVIEWBOT_HIGH_RISK_PATH)
    #[arg(long)]
    list: Option<PathBuf>,

    /// Paths to classify
    #[arg(required = true)]
    paths: Vec<String>,
}

#[derive(Parser, Debug)]
struct ApprovalsArgs {
    /// CODEOWNERS file (defaults to REVIEWBOT_CODEOWNERS_PATH)
    #[arg(long)]
    codeowners: Option<PathBuf>,

    /// High-risk prefix list (defaults to REVIEWBOT_HIGH_RISK_PATH)
    #[arg(long)]
    high_risk: Option<PathBuf>,

    /// Someone who approved; repeat for each approver
    #[arg(long = "approver")]
    approvers: Vec<String>,

    /// Also show how many of the paths each of these people owns
    #[arg(long = "reviewer")]
    reviewers: Vec<String>,

    /// Print JSON instead of text
    #[arg(long)]
    json: bool,

    /// Changed paths
    #[arg(required = true)]
    paths: Vec<String>,
}

#[derive(Parser, Debug)]
struct TurnArgs {
    /// Pull request as workspace/repo/number
    #[arg(long)]
    pr: PrId,

    #[command(subcommand)]
    action: TurnAction,
}

#[derive(Subcommand, Debug)]
enum TurnAction {
    /// Show the current turn and the stored state
    Show,
    /// Start tracking a pull request
    Init {
        #[arg(long)]
        author: String,
        #[arg(long = "reviewer")]
        reviewers: Vec<String>,
    },
    /// Add a reviewer
    Add { email: String },
    /// Remove a reviewer
    Remove { email: String },
    /// Record that someone acted on the pull request
    Switch { email: String },
    /// Suspend automatic switching
    Freeze { by: String },
    /// Resume automatic switching
    Unfreeze,
    /// Put someone back into the current turn
    Nudge { email: String },
    /// Pin attention on exactly these people
    Pin {
        #[arg(required = true)]
        emails: Vec<String>,
    },
    /// Stop tracking the pull request
    Delete,
}

#[derive(Parser, Debug)]
struct ChatArgs {
    /// Pull request as workspace/repo/number
    #[arg(long)]
    pr: PrId,

    /// Email of whoever sent the message
    #[arg(long)]
    actor: String,

    /// JSON object mapping chat user ids to emails
    #[arg(long)]
    directory: Option<PathBuf>,

    /// CODEOWNERS file for `explain` and `approvals`
    #[arg(long)]
    codeowners: Option<PathBuf>,

    /// High-risk prefix list for `approvals`
    #[arg(long)]
    high_risk: Option<PathBuf>,

    /// Changed path, for `explain` and `approvals`; repeat for each path
    #[arg(long = "path")]
    paths: Vec<String>,

    /// Someone who approved, for `approvals`; repeat for each approver
    #[arg(long = "approver")]
    approvers: Vec<String>,

    /// The chat message
    message: String,
}

/// Read a file, treating a missing file as absent.
fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "File not found, treating as empty");
            Ok(None)
        }
        Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
    }
}

fn load_codeowners(path: &Path) -> Result<OwnershipTable> {
    let text = read_optional(path)?;
    ownership_from_text(text.as_deref())
        .with_context(|| format!("Invalid CODEOWNERS file {}", path.display()))
}

fn load_high_risk(path: &Path) -> Result<HighRiskList> {
    Ok(read_optional(path)?
        .map(|text| HighRiskList::parse(&text))
        .unwrap_or_default())
}

fn load_directory(path: &Path) -> Result<StaticDirectory> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read directory file {}", path.display()))?;
    let entries: HashMap<String, String> = serde_json::from_str(&text)
        .with_context(|| format!("Directory file {} is not a JSON object", path.display()))?;
    Ok(entries.into_iter().collect())
}

fn open_turn_store(config: &Config) -> Result<TurnStore> {
    let db_path = config.state_db_path();
    let repository = SqliteDocumentStore::new(&db_path)
        .with_context(|| format!("Failed to open state database {}", db_path.display()))?;
    Ok(TurnStore::new(Arc::new(repository)))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to encode JSON")?
    );
    Ok(())
}

fn run_owners(config: &Config, args: OwnersArgs) -> Result<()> {
    let path = args
        .codeowners
        .unwrap_or_else(|| PathBuf::from(&config.codeowners_path));
    let table = load_codeowners(&path)?;

    if args.flatten {
        let owners = table.owners_per_path(&args.paths, true);
        if args.json {
            return print_json(&owners);
        }
        for (path, owners) in &owners.owners {
            println!("{}: {}", path, owners.join(" "));
        }
        return Ok(());
    }

    let explanation = explain(&table, &args.paths);
    if args.json {
        return print_json(&explanation);
    }
    print!("{}", explanation);
    Ok(())
}

fn run_high_risk(config: &Config, args: HighRiskArgs) -> Result<()> {
    let path = args
        .list
        .unwrap_or_else(|| PathBuf::from(&config.high_risk_path));
    let list = load_high_risk(&path)?;
    for path in args.paths.iter().filter(|p| list.is_high_risk(p)) {
        println!("{}", path);
    }
    println!(
        "{} of {} files are high risk",
        list.count_high_risk_files(&args.paths),
        args.paths.len()
    );
    Ok(())
}

fn run_approvals(config: &Config, args: ApprovalsArgs) -> Result<()> {
    let codeowners = args
        .codeowners
        .unwrap_or_else(|| PathBuf::from(&config.codeowners_path));
    let high_risk = args
        .high_risk
        .unwrap_or_else(|| PathBuf::from(&config.high_risk_path));
    let table = load_codeowners(&codeowners)?;
    let list = load_high_risk(&high_risk)?;

    let report = ApprovalReport::build(&table, &list, &args.paths, &args.approvers);
    if args.json {
        return print_json(&report);
    }
    println!("{}", report);
    for (reviewer, count) in owned_file_counts(&table, &args.reviewers, &args.paths) {
        println!("{} owns {} of the changed files", reviewer, count);
    }
    Ok(())
}

fn print_turn(pr: &PrId, turn: &PrTurn) {
    println!("{}", pr);
    println!("  author: {}", turn.author());
    for (reviewer, has_turn) in turn.reviewers() {
        let mark = if *has_turn { "*" } else { " " };
        println!("  {} {}", mark, reviewer);
    }
    if turn.is_explicit() {
        println!("  attention pinned");
    }
    if let Some(by) = turn.frozen_by() {
        println!("  frozen by {}", by);
    }
    println!("  waiting on: {}", turn.current_turn().join(", "));
}

async fn run_turn(config: &Config, args: TurnArgs) -> Result<()> {
    let store = open_turn_store(config)?;
    let pr = args.pr;

    let changed = match args.action {
        TurnAction::Show => {
            let turn = store
                .document(&pr)
                .await?
                .ok_or_else(|| anyhow!("{} is not tracked", pr))?;
            print_turn(&pr, &turn);
            return Ok(());
        }
        TurnAction::Init { author, reviewers } => {
            let turn = store.init(&pr, &author, &reviewers).await?;
            print_turn(&pr, &turn);
            return Ok(());
        }
        TurnAction::Add { email } => store.add_reviewer(&pr, &email).await?,
        TurnAction::Remove { email } => store.remove_reviewer(&pr, &email).await?,
        TurnAction::Switch { email } => store.switch(&pr, &email).await?,
        TurnAction::Freeze { by } => store.freeze(&pr, &by).await?,
        TurnAction::Unfreeze => store.unfreeze(&pr).await?,
        TurnAction::Nudge { email } => store.nudge(&pr, &email).await?,
        TurnAction::Pin { emails } => store.set_explicit(&pr, &emails).await?,
        TurnAction::Delete => {
            if store.delete(&pr).await? {
                println!("Stopped tracking {}", pr);
            } else {
                println!("{} was not tracked", pr);
            }
            return Ok(());
        }
    };

    if !changed {
        println!("No change");
    }
    println!("Waiting on: {}", store.current_turn(&pr).await?.join(", "));
    Ok(())
}

async fn run_tracked(config: &Config) -> Result<()> {
    let store = open_turn_store(config)?;
    for pr in store.tracked().await? {
        println!("{}", pr);
    }
    Ok(())
}

async fn run_chat(config: &Config, args: ChatArgs) -> Result<()> {
    let command = match parse_command(&config.command_prefix, &args.message) {
        ParseResult::NoMention => {
            info!("Message does not address the bot");
            return Ok(());
        }
        ParseResult::UnrecognizedCommand { attempted } => {
            println!("Unknown command {:?}", attempted);
            return Ok(());
        }
        ParseResult::Command(command) => command,
    };

    let directory = match &args.directory {
        Some(path) => load_directory(path)?,
        None => StaticDirectory::new(),
    };
    let store = open_turn_store(config)?;
    let reply = execute_command(&store, &directory, &args.pr, &args.actor, &command).await?;

    let command = match reply {
        CommandReply::NeedsChangeSet(command) => command,
        reply => {
            println!("{}", reply);
            return Ok(());
        }
    };

    let codeowners = args
        .codeowners
        .unwrap_or_else(|| PathBuf::from(&config.codeowners_path));
    let table = load_codeowners(&codeowners)?;
    match command {
        ChatCommand::Explain => print!("{}", explain(&table, &args.paths)),
        _ => {
            let high_risk = args
                .high_risk
                .unwrap_or_else(|| PathBuf::from(&config.high_risk_path));
            let list = load_high_risk(&high_risk)?;
            println!(
                "{}",
                ApprovalReport::build(&table, &list, &args.paths, &args.approvers)
            );
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = Config::from_env().context("Failed to load configuration")?;
    if let Some(state_dir) = cli.state_dir {
        config.state_dir = state_dir;
    }

    match cli.command {
        Commands::Owners(args) => run_owners(&config, args),
        Commands::HighRisk(args) => run_high_risk(&config, args),
        Commands::Approvals(args) => run_approvals(&config, args),
        Commands::Turn(args) => run_turn(&config, args).await,
        Commands::Tracked => run_tracked(&config).await,
        Commands::Chat(args) => run_chat(&config, args).await,
    }
}
