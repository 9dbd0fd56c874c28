pub mod generic;
pub mod interface;
