pub mod archive;
pub mod cleanup;
pub mod converter;
pub mod pipeline;
pub mod staging;
