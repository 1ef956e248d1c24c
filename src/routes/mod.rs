pub mod abstracts;
