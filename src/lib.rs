pub mod config;
pub mod currency;
pub mod cycle;
pub mod diagnostics;
pub mod extractor;
pub mod models;
pub mod notifiers;
pub mod scheduler;
pub mod scraper;
pub mod store;
pub mod utils;

// Re-export commonly used types
pub use config::AppConfig;
pub use cycle::{CycleError, CycleReport, CycleStage, QueryCycleRunner};
pub use scheduler::{RoundSummary, SchedulerLoop, SchedulerStats};
pub use utils::error::AppError;

pub type Result<T> = std::result::Result<T, AppError>;
