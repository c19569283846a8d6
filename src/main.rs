use anyhow::{Context, Result, bail};
use clap::Parser;
use futures_util::StreamExt;
use mintai_voice::audio::{merge_clips, probe_duration};
use mintai_voice::cli::{Cli, Commands, ConfigAction, ReplyArgs, default_log_filter};
use mintai_voice::config::Config;
use mintai_voice::llm::{HttpGenerator, MockGenerator};
use mintai_voice::pipeline::{DirClipStore, PipelineEvent};
use mintai_voice::session::{InMemoryHistoryStore, spawn_configured_sweeper};
use mintai_voice::stt::{HttpTranscriber, MockTranscriber};
use mintai_voice::tts::{HttpSynthesizer, MockSynthesizer};
use mintai_voice::{Collaborators, HistoryStore, Orchestrator, ReplyRequest};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    init_tracing(&config.log_level, cli.verbose);

    match cli.command {
        Commands::Reply(args) => {
            config.validate()?;
            run_reply(&config, args, cli.mock).await?;
        }
        Commands::Probe { file } => probe_file(&file)?,
        Commands::Merge { output, inputs } => merge_files(&output, &inputs)?,
        Commands::Config { action } => match action {
            ConfigAction::Show => print!("{}", toml::to_string_pretty(&config)?),
            ConfigAction::Path => match custom_or_default_path(cli.config.as_deref()) {
                Some(path) => println!("{}", path.display()),
                None => bail!("no configuration directory on this system"),
            },
        },
    }

    Ok(())
}

/// Load configuration from file or use defaults.
///
/// Priority order:
/// 1. Custom config path from CLI (--config)
/// 2. Default config path (~/.config/mintai-voice/config.toml)
/// 3. Built-in defaults with environment variable overrides
fn load_config(custom_path: Option<&Path>) -> Result<Config> {
    let config = match (custom_path, Config::default_path()) {
        (Some(path), _) => Config::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        (None, Some(path)) => Config::load_or_default(&path)?,
        (None, None) => Config::default(),
    };
    Ok(config.with_env_overrides())
}

fn custom_or_default_path(custom_path: Option<&Path>) -> Option<PathBuf> {
    custom_path.map(Path::to_path_buf).or_else(Config::default_path)
}

/// Logs go to stderr so stdout stays machine-readable.
fn init_tracing(config_level: &str, verbose: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_log_filter(config_level, verbose)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn collaborators(
    config: &Config,
    history: Arc<dyn HistoryStore>,
    mock: bool,
) -> Result<Collaborators> {
    let clips = Arc::new(DirClipStore::from_config(&config.output));

    if mock {
        let delimiter = config.pipeline.delimiter.as_str();
        let deltas = [
            "Lí hó",
            delimiter,
            "góa sī lí ê",
            " chō-chhiú",
            delimiter,
            "ū siáⁿ-mih tāi-chì?",
        ];
        return Ok(Collaborators {
            transcriber: Arc::new(MockTranscriber::new()),
            generator: Arc::new(MockGenerator::new().with_deltas(&deltas)),
            synthesizer: Arc::new(MockSynthesizer::new()),
            history,
            clips,
        });
    }

    Ok(Collaborators {
        transcriber: Arc::new(HttpTranscriber::from_config(config)?),
        generator: Arc::new(HttpGenerator::from_config(config)?),
        synthesizer: Arc::new(HttpSynthesizer::from_config(config)?),
        history,
        clips,
    })
}

async fn run_reply(config: &Config, args: ReplyArgs, mock: bool) -> Result<()> {
    let mut request = match (args.text, args.audio) {
        (Some(text), _) => ReplyRequest::text(text),
        (None, Some(path)) => ReplyRequest::audio(
            tokio::fs::read(&path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?,
        ),
        (None, None) => bail!("either --text or --audio is required"),
    };
    if let Some(session) = args.session {
        request = request.with_session(session);
    }
    if let Some(speaker) = args.speaker {
        request = request.with_speaker(speaker);
    }
    if let Some(rate) = args.rate {
        request = request.with_rate(rate);
    }
    if let Some(language) = args.language {
        request = request.with_language(language);
    }
    if args.no_subtitles {
        request = request.with_subtitles(false);
    }

    let history: Arc<dyn HistoryStore> = Arc::new(InMemoryHistoryStore::new());
    let sweeper = spawn_configured_sweeper(history.clone(), config)?;
    let orchestrator = Orchestrator::from_config(collaborators(config, history, mock)?, config)?;

    if args.stream {
        let events = orchestrator.stream_reply(request);
        let mut events = std::pin::pin!(events);
        let mut failure = None;
        while let Some(event) = events.next().await {
            println!("{}", serde_json::to_string(&event)?);
            if let PipelineEvent::Error { message, .. } = event {
                failure = Some(message);
            }
        }
        if let Some(message) = failure {
            bail!("reply failed: {message}");
        }
    } else {
        let reply = orchestrator.reply(request).await?;
        println!("{}", serde_json::to_string(&reply)?);
    }
    sweeper.abort();
    Ok(())
}

fn probe_file(path: &Path) -> Result<()> {
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    match probe_duration(&bytes) {
        Some(seconds) => println!("{seconds:.3}"),
        None => bail!("{} is not a readable WAV file", path.display()),
    }
    Ok(())
}

fn merge_files(output: &Path, inputs: &[PathBuf]) -> Result<()> {
    let clips = inputs
        .iter()
        .map(|path| {
            std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))
        })
        .collect::<Result<Vec<_>>>()?;
    let merged = merge_clips(&clips)?;
    std::fs::write(output, &merged)
        .with_context(|| format!("failed to write {}", output.display()))?;
    match probe_duration(&merged) {
        Some(seconds) => eprintln!("Merged {} clips ({seconds:.3}s)", clips.len()),
        None => eprintln!("Merged {} clips", clips.len()),
    }
    Ok(())
}
