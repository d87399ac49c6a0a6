pub mod item;
pub mod query;

// Re-exports for convenience
pub use item::*;
pub use query::*;
