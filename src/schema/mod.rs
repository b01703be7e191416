pub mod kind;
pub mod store;
pub mod template;

pub use kind::{FieldSpec, Increment, RecordTypeSchema, format_remap, parse_remap};
pub use store::{IdentityField, SchemaStore};
pub use template::{FieldDefinition, TemplateSyncReport, fetch_field_master, sync_template};
