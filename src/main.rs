mod common;
mod ui;
mod video;

use clap::Parser;

use crate::ui::prelude::{Level, OutputFormat, emit};
use crate::video::cli::SlidecastCommands;
use crate::video::commands::handle_command;

/// Narrated slide videos from presentation speaker notes
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Activate debug mode
    #[arg(short, long, global = true)]
    debug: bool,

    /// Output format for events
    #[arg(long, value_enum, default_value_t = OutputFormat::Text, global = true)]
    output: OutputFormat,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: SlidecastCommands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    ui::init(cli.output, !cli.no_color);
    ui::set_debug_mode(cli.debug);

    match handle_command(cli.command).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(err) => {
            emit(Level::Error, "slidecast.error", &format!("{err:#}"), None);
            std::process::exit(1);
        }
    }
}
