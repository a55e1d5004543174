pub mod engine;
pub mod error;
pub mod execution;
pub mod review;

pub use engine::{BatchStatus, BuyContext, PortfolioEngine, SellAllItem, SellAllReport, SellOutcome};
pub use error::PortfolioError;
pub use execution::{ExecutionOutcome, ExecutionService, ReviewOutcome};
pub use review::{PositionAction, PositionManager};
