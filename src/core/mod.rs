pub mod compositor;
pub mod doi;
pub mod error;
pub mod metadata;
pub mod openai;
pub mod output;
pub mod pipeline;
pub mod qr;
pub mod source;
