pub mod context;
pub mod data;
pub mod data_chunk;
pub mod entities;
pub mod parameter;
pub mod parameter_declaration;
