pub mod embedder;
pub mod retrieve;
