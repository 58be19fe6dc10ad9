use indicatif::{ProgressBar, ProgressStyle};

use crate::ui::prelude::{OutputFormat, get_output_format};

/// Spinner for a pipeline stage. Hidden in JSON mode so stdout stays parseable.
pub fn create_spinner(message: String) -> ProgressBar {
    if get_output_format() == OutputFormat::Json {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner()
        .template("{spinner} {msg}")
        .map(|s| s.tick_chars("⠁⠉⠙⠚⠒⠂⠲⠴⠤⠄⠦⠖⠓⠋ "))
    {
        pb.set_style(style);
    }
    pb.set_message(message);
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

/// Progress bar measured in milliseconds of encoded media.
pub fn create_media_bar(total_seconds: f64, message: &str) -> ProgressBar {
    if get_output_format() == OutputFormat::Json {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new((total_seconds.max(0.0) * 1000.0) as u64);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] ({eta}) {msg}")
        .map(|s| s.progress_chars("█▉▊▋▌▍▎▏ "))
    {
        pb.set_style(style);
    }
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb.set_message(message.to_string());
    pb
}

/// Finish a spinner and print a success message with a checkmark
pub fn finish_spinner_with_success(pb: ProgressBar, message: impl Into<String>) {
    pb.finish_and_clear();
    if get_output_format() == OutputFormat::Text {
        println!("✓ {}", message.into());
    }
}
