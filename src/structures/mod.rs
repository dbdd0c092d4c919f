/// Core reusable data structures
pub mod exist_filter;
pub mod expire_table;

// Export the main types
pub use exist_filter::ExistFilter;
pub use expire_table::{CellGuard, ExpireTable, Visit, WalkerHandle};
