pub mod audio;
pub mod cli;
pub mod commands;
pub mod compose;
pub mod config;
pub mod error;
pub mod imagegen;
pub mod lease;
pub mod notes;
pub mod pipeline;
pub mod slides;
pub mod speech;
pub mod support;
pub mod timeline;
pub mod voice;

#[cfg(test)]
mod testing;
