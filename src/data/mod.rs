//! Race data loading and factor computation

pub mod factors;
pub mod race_loader;

// Re-export commonly used types
pub use factors::{Factor, FactorEngineering, FactorSet, FactorTables, TrainerTable};
pub use race_loader::{group_entry_rows, load_race_cards, load_race_results};
