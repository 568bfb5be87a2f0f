
mod data;
mod filter;
mod hierarchy;
mod predicate;
mod registry;
