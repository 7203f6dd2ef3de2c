pub mod command;
pub mod config;
pub mod directory;
pub mod event;
pub mod report;
pub mod source;
pub mod store;
pub mod turn_store;

pub use command::{execute_command, parse_command, ChatCommand, CommandReply, ParseResult};
pub use directory::{EmailDirectory, StaticDirectory};
pub use event::TurnEvent;
pub use store::{DocumentKey, DocumentKind, DocumentStore, PrId, RepositoryError};
pub use turn_store::{TurnStore, TurnStoreError};
