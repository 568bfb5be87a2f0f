pub mod filter;
pub mod operators;
pub mod predicate;

pub use filter::{CompareOp, Criterion, Filter, FindOptions};
pub use predicate::{EntityTest, Predicate};
