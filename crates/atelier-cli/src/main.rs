use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use atelier_contracts::models::ModelSelector;
use atelier_contracts::session::{GenerationRecord, SessionState};
use atelier_contracts::styles;
use atelier_engine::{
    derived_filename, encode_image, load_reference_file, AspectRatio, GenerateCommand,
    OutputFormat, StudioConfig, StudioEngine,
};
use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "atelier", version, about = "Atelier image generation pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Compose a prompt from a command and synthesize one image.
    Generate(GenerateArgs),
    /// Resample an existing image to a larger width.
    Upscale(UpscaleArgs),
    /// Load a style directory and report its categories.
    Styles(StylesArgs),
    /// Run a batch of commands and print the session history.
    History(HistoryArgs),
    /// List the registered models.
    Models(ModelsArgs),
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    /// User command, e.g. "Improve: a harbor at dusk".
    command: String,
    #[arg(long)]
    model: Option<String>,
    #[arg(long, default_value = "1:1")]
    aspect_ratio: String,
    /// Reference image files (png or jpeg); forwarded on the multimodal route.
    #[arg(long = "reference")]
    references: Vec<PathBuf>,
    #[arg(long, default_value_t = 1)]
    count: u32,
    /// Send the command text as the prompt without composing.
    #[arg(long)]
    raw: bool,
    #[arg(long, default_value = "png")]
    format: String,
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long)]
    password: Option<String>,
}

#[derive(Debug, Parser)]
struct UpscaleArgs {
    input: PathBuf,
    #[arg(long)]
    width: u32,
    #[arg(long)]
    out: PathBuf,
    #[arg(long, default_value = "png")]
    format: String,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long)]
    password: Option<String>,
}

#[derive(Debug, Parser)]
struct StylesArgs {
    dir: PathBuf,
}

#[derive(Debug, Parser)]
struct HistoryArgs {
    /// One command per generation, oldest first.
    #[arg(required = true)]
    commands: Vec<String>,
    #[arg(long)]
    model: Option<String>,
    #[arg(long, default_value = "1:1")]
    aspect_ratio: String,
    #[arg(long)]
    raw: bool,
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long)]
    password: Option<String>,
}

#[derive(Debug, Parser)]
struct ModelsArgs {
    #[arg(long)]
    json: bool,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("atelier error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Generate(args) => run_generate(args),
        Command::Upscale(args) => run_upscale(args),
        Command::Styles(args) => run_styles(args),
        Command::History(args) => run_history(args),
        Command::Models(args) => run_models(args),
    }
}

fn run_generate(args: GenerateArgs) -> Result<i32> {
    let events_path = args
        .events
        .clone()
        .unwrap_or_else(|| args.out.join("events.jsonl"));
    let mut engine = StudioEngine::new(StudioConfig::from_env(), events_path)?;
    let mut session = engine.new_session();
    unlock_or_bail(&engine, &mut session, args.password.as_deref())?;

    let mut command = GenerateCommand::new(args.command.as_str());
    command.model = args.model.clone();
    command.aspect_ratio = args.aspect_ratio.parse::<AspectRatio>()?;
    command.image_count = args.count.max(1);
    command.raw = args.raw;
    for path in &args.references {
        let (name, pixels) = load_reference_file(path)?;
        command.reference_ids.push(session.references.add(name, pixels));
    }

    let record = engine.generate(&mut session, &command)?;
    let format = args.format.parse::<OutputFormat>()?;
    let path = write_record(&record, &args.out, format)?;

    println!("Prompt used: {}", record.prompt_used);
    println!("Wrote {}", path.display());
    println!("Events: {}", engine.events().path().display());
    Ok(0)
}

fn run_upscale(args: UpscaleArgs) -> Result<i32> {
    let events_path = args.events.clone().unwrap_or_else(|| {
        args.out
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map(|parent| parent.join("events.jsonl"))
            .unwrap_or_else(|| PathBuf::from("events.jsonl"))
    });
    let engine = StudioEngine::new(StudioConfig::from_env(), events_path)?;
    let mut session = engine.new_session();
    unlock_or_bail(&engine, &mut session, args.password.as_deref())?;

    let (name, pixels) = load_reference_file(&args.input)?;
    let source = GenerationRecord::new(pixels, name, "import");
    let scaled = engine.upscale_record(&source, args.width)?;

    let format = args.format.parse::<OutputFormat>()?;
    if let Some(parent) = args.out.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("could not create {}", parent.display()))?;
    }
    fs::write(&args.out, encode_image(&scaled.image, format)?)
        .with_context(|| format!("could not write {}", args.out.display()))?;

    println!(
        "Wrote {} ({}x{})",
        args.out.display(),
        scaled.image.width(),
        scaled.image.height()
    );
    Ok(0)
}

fn run_styles(args: StylesArgs) -> Result<i32> {
    let report = styles::load(&args.dir);
    println!("{}", report.message);
    let Some(library) = report.library else {
        return Ok(1);
    };
    for category in library.categories() {
        println!("- {category}");
    }
    Ok(0)
}

fn run_history(args: HistoryArgs) -> Result<i32> {
    let events_path = args
        .events
        .clone()
        .unwrap_or_else(|| args.out.join("events.jsonl"));
    let mut engine = StudioEngine::new(StudioConfig::from_env(), events_path)?;
    let mut session = engine.new_session();
    unlock_or_bail(&engine, &mut session, args.password.as_deref())?;

    let aspect_ratio = args.aspect_ratio.parse::<AspectRatio>()?;
    for text in &args.commands {
        let mut command = GenerateCommand::new(text.as_str());
        command.model = args.model.clone();
        command.aspect_ratio = aspect_ratio;
        command.raw = args.raw;
        let record = engine.generate(&mut session, &command)?;
        write_record(&record, &args.out, OutputFormat::Png)?;
    }

    println!(
        "History (capacity {}, {} kept):",
        engine.config().history_capacity,
        session.history.len()
    );
    for (index, entry) in session.history.list().iter().enumerate() {
        println!(
            "{:>2}. [{}] {} {}x{}  {}",
            index + 1,
            entry.created_at,
            entry.model,
            entry.image.width(),
            entry.image.height(),
            entry.prompt_used
        );
    }
    Ok(0)
}

fn run_models(args: ModelsArgs) -> Result<i32> {
    let selector = ModelSelector::new(None);
    for model in selector.registry().list() {
        if args.json {
            println!("{}", serde_json::to_string(model)?);
        } else {
            let route = model
                .route
                .map(|route| format!("{route:?}").to_ascii_lowercase())
                .unwrap_or_else(|| "-".to_string());
            println!(
                "{:<32} {:<10} {:<12} {}",
                model.name,
                route,
                model.capabilities.join(","),
                model.label
            );
        }
    }
    Ok(0)
}

fn unlock_or_bail(
    engine: &StudioEngine,
    session: &mut SessionState,
    password: Option<&str>,
) -> Result<()> {
    if !engine.unlock(session, password.unwrap_or_default()) {
        bail!("access denied: wrong or missing --password");
    }
    Ok(())
}

fn write_record(
    record: &GenerationRecord,
    out_dir: &Path,
    format: OutputFormat,
) -> Result<PathBuf> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("could not create {}", out_dir.display()))?;
    let path = out_dir.join(derived_filename(&record.prompt_used, format));
    fs::write(&path, encode_image(&record.image, format)?)
        .with_context(|| format!("could not write {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use atelier_contracts::session::GenerationRecord;
    use atelier_engine::{OutputFormat, StudioConfig, StudioEngine};
    use clap::Parser;
    use image::{DynamicImage, RgbImage};

    use super::{unlock_or_bail, write_record, Cli, Command};

    fn test_config() -> StudioConfig {
        StudioConfig {
            api_base: "http://localhost:0".to_string(),
            api_key: None,
            text_model: "gemini-3-pro-preview".to_string(),
            password: "secret".to_string(),
            history_capacity: 10,
            style_dir: None,
        }
    }

    #[test]
    fn cli_parses_generate_invocation() {
        let cli = Cli::try_parse_from([
            "atelier",
            "generate",
            "Improve: a harbor at dusk",
            "--model",
            "imagen-4.0-generate-001",
            "--aspect-ratio",
            "16:9",
            "--reference",
            "facade.png",
            "--out",
            "out",
            "--password",
            "secret",
        ])
        .expect("parse");
        let Command::Generate(args) = cli.command else {
            panic!("expected generate");
        };
        assert_eq!(args.command, "Improve: a harbor at dusk");
        assert_eq!(args.model.as_deref(), Some("imagen-4.0-generate-001"));
        assert_eq!(args.aspect_ratio, "16:9");
        assert_eq!(args.references.len(), 1);
        assert_eq!(args.count, 1);
        assert!(!args.raw);
    }

    #[test]
    fn cli_requires_at_least_one_history_command() {
        assert!(Cli::try_parse_from(["atelier", "history", "--out", "out"]).is_err());
    }

    #[test]
    fn unlock_or_bail_rejects_missing_password() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let engine = StudioEngine::new(test_config(), temp.path().join("events.jsonl"))?;
        let mut session = engine.new_session();

        assert!(unlock_or_bail(&engine, &mut session, None).is_err());
        assert!(unlock_or_bail(&engine, &mut session, Some("wrong")).is_err());
        assert!(!session.is_unlocked());

        unlock_or_bail(&engine, &mut session, Some("secret"))?;
        assert!(session.is_unlocked());
        Ok(())
    }

    #[test]
    fn write_record_derives_name_from_prompt() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let record = GenerationRecord::new(
            DynamicImage::ImageRgb8(RgbImage::new(4, 4)),
            "a harbor at dusk",
            "dryrun-image-1",
        );

        let path = write_record(&record, &temp.path().join("renders"), OutputFormat::Png)?;
        assert!(path.exists());
        let name = path.file_name().and_then(|name| name.to_str()).unwrap_or("");
        assert!(name.starts_with("atelier-"));
        assert!(name.ends_with(".png"));
        Ok(())
    }
}
