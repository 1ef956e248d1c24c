pub mod abstracts;
pub mod common;
