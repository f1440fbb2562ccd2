//! Reshard planning and execution.
//!
//! - `table`: pure planners (rebalance toward a new master, drain a
//!   departing one)
//! - `cache`: per-reshard connection cache
//! - `migrator`: the single-slot migration protocol with per-error-class
//!   recovery
//! - `router`: bounded-parallelism fan-out over a plan

pub mod cache;
pub mod migrator;
pub mod router;
pub mod table;

pub use cache::ConnectionCache;
pub use migrator::{ErrorClass, SlotMigrationError, SlotMigrator, classify_error};
pub use router::{MIGRATION_PARALLELISM, ReshardError, run_migrations};
pub use table::{MigrationJob, ReshardTable, ReshardTableError, SlotMove, TOTAL_SLOTS};
