pub mod error;
pub mod literal;
pub mod value;

pub use error::{ReconcileError, Result};
pub use literal::{quote_literal, quote_text};
pub use value::{FieldType, TIMESTAMP_FORMAT, Value};
