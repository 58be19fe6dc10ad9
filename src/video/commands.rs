use anyhow::{Context, Result};
use serde_json::json;

use super::cli::{
    ConfigArgs, NarrateArgs, NotesArgs, SlidecastCommands, SlidesArgs, VideoArgs,
};
use super::config::{SlidecastConfig, config_path};
use super::notes::extract_notes;
use super::pipeline::{
    BookendInputs, Pipeline, PipelineOptions, PipelineRequest, SystemTools,
};
use super::slides::{LibreOfficeConverter, SlideRenderer};
use super::support::utils::file_stem;
use crate::common::progress::{create_spinner, finish_spinner_with_success};
use crate::ui::prelude::{Level, OutputFormat, emit, get_output_format};

/// Run one subcommand. `Ok(false)` means the command ran but failed and has
/// already reported why.
pub async fn handle_command(command: SlidecastCommands) -> Result<bool> {
    match command {
        SlidecastCommands::Narrate(args) => handle_narrate(args).await,
        SlidecastCommands::Video(args) => handle_video(args).await,
        SlidecastCommands::Notes(args) => handle_notes(args),
        SlidecastCommands::Slides(args) => handle_slides(args).await,
        SlidecastCommands::Config(args) => handle_config(args),
    }
}

async fn handle_narrate(args: NarrateArgs) -> Result<bool> {
    let config = SlidecastConfig::load(args.config.config.as_deref())?;
    let request = PipelineRequest {
        document: args.document,
        gender: args.gender,
        prompt_text: args.prompt_text,
        options: PipelineOptions {
            prompt_policy: args.policy,
            ..PipelineOptions::narration()
        },
        bookends: BookendInputs::default(),
    };
    run_pipeline(&config, &request).await
}

async fn handle_video(args: VideoArgs) -> Result<bool> {
    let config = SlidecastConfig::load(args.config.config.as_deref())?;
    let defaults = &config.video;

    let request = PipelineRequest {
        document: args.document,
        gender: args.gender,
        prompt_text: None,
        options: PipelineOptions {
            opening_closing_mode: args.mode.unwrap_or(defaults.opening_closing_mode),
            quality: args.quality.unwrap_or(defaults.quality),
            ..PipelineOptions::video()
        },
        bookends: BookendInputs {
            opening: args.opening.or_else(|| defaults.opening.clone()),
            closing: args.closing.or_else(|| defaults.closing.clone()),
            opening_audio: args.opening_audio.or_else(|| defaults.opening_audio.clone()),
            closing_audio: args.closing_audio.or_else(|| defaults.closing_audio.clone()),
            opening_prompt: args.opening_prompt.or_else(|| defaults.opening_prompt.clone()),
            closing_prompt: args.closing_prompt.or_else(|| defaults.closing_prompt.clone()),
            music: args.music.or_else(|| defaults.background_music.clone()),
        },
    };
    run_pipeline(&config, &request).await
}

async fn run_pipeline(config: &SlidecastConfig, request: &PipelineRequest) -> Result<bool> {
    let tools = SystemTools::from_config(config)?;
    let outcome = Pipeline::new(config, tools.collaborators())
        .run(request)
        .await;
    outcome.emit();
    Ok(outcome.success)
}

fn handle_notes(args: NotesArgs) -> Result<bool> {
    let config = SlidecastConfig::load(args.config.config.as_deref())?;
    let document = config.resolve_document(&args.document);
    let scratch = tempfile::tempdir().context("Failed to create scratch directory")?;
    let notes = extract_notes(&document, scratch.path())?;

    match get_output_format() {
        OutputFormat::Json => emit(
            Level::Info,
            "notes.list",
            &format!("{} note pages", notes.len()),
            Some(json!({ "document": document, "notes": notes })),
        ),
        OutputFormat::Text => {
            for note in &notes {
                let text = if note.has_content() {
                    note.text.as_str()
                } else {
                    "(no notes)"
                };
                emit(
                    Level::Info,
                    "notes.item",
                    &format!("{:>3}  {text}", note.index),
                    None,
                );
            }
        }
    }
    Ok(true)
}

async fn handle_slides(args: SlidesArgs) -> Result<bool> {
    let config = SlidecastConfig::load(args.config.config.as_deref())?;
    let document = config.resolve_document(&args.document);
    let out_dir = match args.out_dir {
        Some(dir) => dir,
        None => {
            let stem = file_stem(&document)?;
            document.with_file_name(format!("{stem}_slides"))
        }
    };
    let quality = args.quality.unwrap_or(config.video.quality);

    let converter = LibreOfficeConverter::new(config.runtime.tool_timeout());
    let scratch = tempfile::tempdir().context("Failed to create scratch directory")?;
    let spinner = create_spinner(format!("Rendering {}", document.display()));
    let rendered = SlideRenderer::new(&converter)
        .render(&document, scratch.path(), &out_dir, quality)
        .await;

    match rendered {
        Ok(images) => {
            finish_spinner_with_success(
                spinner,
                format!("Rendered {} slides into {}", images.len(), out_dir.display()),
            );
            emit(
                Level::Success,
                "slides.rendered",
                &format!("{} slide images", images.len()),
                Some(json!({ "out_dir": out_dir, "slides": images })),
            );
            Ok(true)
        }
        Err(err) => {
            spinner.finish_and_clear();
            emit(
                Level::Error,
                "slides.failed",
                &err.to_string(),
                Some(json!({ "kind": err.kind(), "diagnostics": err.diagnostics() })),
            );
            Ok(false)
        }
    }
}

fn handle_config(args: ConfigArgs) -> Result<bool> {
    let path = match args.config.config {
        Some(path) => path,
        None => config_path()?,
    };
    if args.path {
        emit(
            Level::Info,
            "config.path",
            &path.display().to_string(),
            Some(json!({ "path": path })),
        );
        return Ok(true);
    }

    let config = SlidecastConfig::load(Some(&path))?;
    match get_output_format() {
        OutputFormat::Json => emit(
            Level::Info,
            "config.show",
            &format!("Configuration from {}", path.display()),
            Some(serde_json::to_value(&config)?),
        ),
        OutputFormat::Text => {
            let rendered =
                toml::to_string_pretty(&config).context("Failed to render configuration")?;
            emit(Level::Info, "config.show", rendered.trim_end(), None);
        }
    }
    Ok(true)
}
