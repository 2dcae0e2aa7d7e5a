pub mod push;
pub mod store;
