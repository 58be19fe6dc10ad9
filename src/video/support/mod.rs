pub mod ffmpeg;
pub mod manifest;
pub mod process;
pub mod utils;
