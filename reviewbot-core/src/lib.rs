pub mod email;
pub mod highrisk;
pub mod ownership;
pub mod turns;

pub use highrisk::HighRiskList;
pub use ownership::{OwnersPerPath, OwnershipError, OwnershipTable, FALLBACK_OWNERS};
pub use turns::{Attention, PrTurn};
