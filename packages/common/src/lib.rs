pub mod error;
pub mod param;
pub mod schema;

pub use error::ParameterError;
pub use param::{Parameter, ParameterKind, RawValue, Value};
pub use schema::TypeSchema;
