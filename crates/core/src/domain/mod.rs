pub mod actor;
pub mod party;
pub mod product;
pub mod quote;
