//! Schema collaborator: data classes, listen relations, and their validation.

pub mod loader;
pub mod types;
pub mod validator;

pub use loader::{load_schema_from_file, load_schema_from_str};
pub use types::{CachePolicy, ClassShape, DataClass, FieldType, ListenRelation, ServiceSchema};
pub use validator::SchemaValidator;
