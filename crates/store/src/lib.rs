//! Durable schedule state.
//!
//! [`ScheduleStore`] is the contract the scheduler and the conversation
//! front-end rely on. [`PgStore`] backs production; [`MemoryStore`] gives the
//! same claim and uniqueness guarantees in-process for tests and dry runs.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod traits;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use traits::{ScheduleStore, StoredCatalog};
