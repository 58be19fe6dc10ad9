use clap::{Args, Subcommand, ValueHint};
use std::path::PathBuf;

use crate::video::config::{BookendMode, QualityTier};
use crate::video::timeline::PromptPolicy;
use crate::video::voice::Gender;

#[derive(Subcommand, Debug, Clone)]
pub enum SlidecastCommands {
    /// Speak a presentation's notes into a narration track (<stem>.wav)
    Narrate(NarrateArgs),
    /// Build a narrated slide video (<stem>.mp4)
    Video(VideoArgs),
    /// Print the speaker notes of a presentation
    Notes(NotesArgs),
    /// Render slide images only
    Slides(SlidesArgs),
    /// Show the effective configuration
    Config(ConfigArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct ConfigFileArg {
    /// Use this config file instead of the default location
    #[arg(long = "config", value_hint = ValueHint::FilePath)]
    pub config: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct NarrateArgs {
    /// Presentation file, relative to the configured base directory
    #[arg(value_hint = ValueHint::FilePath)]
    pub document: PathBuf,

    #[arg(long, value_enum, default_value_t = Gender::Female)]
    pub gender: Gender,

    /// Text spoken between slides (overrides the configured prompt)
    #[arg(long)]
    pub prompt_text: Option<String>,

    #[arg(long, value_enum, default_value_t = PromptPolicy::InterSlidePrompt)]
    pub policy: PromptPolicy,

    #[command(flatten)]
    pub config: ConfigFileArg,
}

#[derive(Args, Debug, Clone)]
pub struct VideoArgs {
    /// Presentation file, relative to the configured base directory
    #[arg(value_hint = ValueHint::FilePath)]
    pub document: PathBuf,

    #[arg(long, value_enum, default_value_t = Gender::Male)]
    pub gender: Gender,

    /// Background music looped under the narration
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub music: Option<PathBuf>,

    /// Opening image or clip
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub opening: Option<PathBuf>,

    /// Closing image or clip
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub closing: Option<PathBuf>,

    #[arg(long, value_hint = ValueHint::FilePath)]
    pub opening_audio: Option<PathBuf>,

    #[arg(long, value_hint = ValueHint::FilePath)]
    pub closing_audio: Option<PathBuf>,

    /// Generate the opening image from this prompt when no opening is given
    #[arg(long)]
    pub opening_prompt: Option<String>,

    /// Generate the closing image from this prompt when no closing is given
    #[arg(long)]
    pub closing_prompt: Option<String>,

    /// How opening and closing material is supplied
    #[arg(long, value_enum)]
    pub mode: Option<BookendMode>,

    /// Slide rasterization quality
    #[arg(long, value_enum)]
    pub quality: Option<QualityTier>,

    #[command(flatten)]
    pub config: ConfigFileArg,
}

#[derive(Args, Debug, Clone)]
pub struct NotesArgs {
    #[arg(value_hint = ValueHint::FilePath)]
    pub document: PathBuf,

    #[command(flatten)]
    pub config: ConfigFileArg,
}

#[derive(Args, Debug, Clone)]
pub struct SlidesArgs {
    #[arg(value_hint = ValueHint::FilePath)]
    pub document: PathBuf,

    /// Output directory; defaults to <stem>_slides beside the document
    #[arg(long, value_hint = ValueHint::DirPath)]
    pub out_dir: Option<PathBuf>,

    #[arg(long, value_enum)]
    pub quality: Option<QualityTier>,

    #[command(flatten)]
    pub config: ConfigFileArg,
}

#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// Print only the config file location
    #[arg(long)]
    pub path: bool,

    #[command(flatten)]
    pub config: ConfigFileArg,
}
