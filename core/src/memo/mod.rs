//! Per-function memo tables, usage accounting, flush scheduling and culling.

pub mod entry;
pub mod flush;
pub mod table;
pub mod usage;

pub use entry::{CacheEntry, is_null_like, representation_is_null_like};
pub use flush::FlushSchedule;
pub use table::{CullOutcome, MemoTable};
pub use usage::UsageIndex;
