pub mod engine;
pub mod memory;
pub mod selector;

pub use engine::{ExecOutcome, RelationalStore, StoreRow, row_value};
pub use memory::MemoryStore;
pub use selector::{Predicate, Selector, SelectorValue};
