use anyhow::{Context, Result, bail};
use clap::{CommandFactory, Parser};
use dubline::audio::pcm;
use dubline::audio::wav::{WavClip, write_wav_file};
use dubline::cli::{Cli, Commands, ConfigAction};
use dubline::config::Config;
use dubline::daemon::run_daemon;
use dubline::error::DubError;
use dubline::ipc::client::DubClient;
use dubline::ipc::protocol::{ClientEvent, ServerEvent};
use dubline::pipeline::asset::Status;
use dubline::pipeline::backpressure::FlowAction;
use dubline::pipeline::types::FragmentResult;
use dubline::session::{SessionSummary, StreamConfig};
use dubline::stages::StageSet;
use owo_colors::OwoColorize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.quiet, cli.verbose);

    match cli.command {
        Commands::Serve { socket } => {
            let config = load_config(cli.config.as_deref())?;
            run_daemon(config, StageSet::loopback(), socket).await?;
        }
        Commands::Send {
            input,
            socket,
            fragment,
            source,
            target,
            output,
            stream_id,
        } => {
            let config = load_config(cli.config.as_deref())?;
            let request = SendRequest {
                input,
                socket: socket.unwrap_or_else(|| config.socket_path()),
                fragment_ms: fragment,
                source,
                target,
                output,
                stream_id,
            };
            handle_send(request).await?;
        }
        Commands::Config { action } => {
            handle_config_command(action, cli.config.as_deref())?;
        }
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "dubline", &mut std::io::stdout());
        }
    }

    Ok(())
}

/// Log level from flags, or `RUST_LOG`, or `info`.
fn init_logging(quiet: bool, verbose: u8) {
    let level = match (quiet, verbose) {
        (true, _) => Some("warn"),
        (false, 0) => None,
        (false, 1) => Some("debug"),
        (false, _) => Some("trace"),
    };
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(custom_path: Option<&Path>) -> Result<Config> {
    let config = match custom_path {
        Some(path) => {
            Config::load(path).with_context(|| format!("Failed to load {}", path.display()))?
        }
        None => Config::load_or_default(&Config::default_path())?,
    };
    Ok(config.with_env_overrides())
}

fn handle_config_command(action: ConfigAction, custom_path: Option<&Path>) -> Result<()> {
    let config_path = custom_path
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_path);

    match action {
        ConfigAction::Show => {
            if custom_path.is_some() && !config_path.exists() {
                return Err(DubError::ConfigFileNotFound {
                    path: config_path.display().to_string(),
                }
                .into());
            }
            let config = load_config(custom_path)?;
            if let Err(e) = config.validate() {
                eprintln!("{} {}", "warning:".yellow(), e);
            }
            print!("{}", config.to_toml()?);
        }
        ConfigAction::Path => {
            println!("{}", config_path.display());
        }
        ConfigAction::Init { force } => {
            if config_path.exists() && !force {
                bail!(
                    "{} already exists (use --force to overwrite)",
                    config_path.display()
                );
            }
            if let Some(parent) = config_path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            std::fs::write(&config_path, Config::default().to_toml()?)
                .with_context(|| format!("Failed to write {}", config_path.display()))?;
            println!("{} {}", "Wrote".green(), config_path.display());
        }
    }
    Ok(())
}

struct SendRequest {
    input: PathBuf,
    socket: PathBuf,
    fragment_ms: u64,
    source: Option<String>,
    target: Option<String>,
    output: Option<PathBuf>,
    stream_id: Option<String>,
}

/// Streams a WAV file through the service, keeping at most `max_inflight`
/// fragments unanswered, and prints each result as it arrives.
async fn handle_send(request: SendRequest) -> Result<()> {
    let clip = WavClip::open(&request.input)
        .with_context(|| format!("Failed to read {}", request.input.display()))?;

    let stream_id = request.stream_id.unwrap_or_else(|| {
        request
            .input
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "stream".to_string())
    });
    let fragments = clip.fragments(&stream_id, request.fragment_ms);
    let original_ms: HashMap<u64, u64> = fragments
        .iter()
        .map(|f| (f.sequence_number, f.duration_ms()))
        .collect();

    let mut client = DubClient::connect(&request.socket).await?;
    client
        .send(&ClientEvent::StreamInit(StreamConfig {
            source_language: request.source,
            target_language: request.target,
            sample_rate: Some(clip.sample_rate),
            channels: Some(clip.channels),
            expected_fragment_ms: Some(request.fragment_ms),
            ..StreamConfig::new(stream_id.clone())
        }))
        .await?;

    let max_inflight = match client.next_event().await? {
        Some(ServerEvent::StreamReady(ready)) => {
            eprintln!(
                "{} {} ({} -> {}, {} fragments)",
                "Streaming".green(),
                ready.stream_id,
                ready.capabilities.recognizer.dimmed(),
                ready.capabilities.synthesizer.dimmed(),
                fragments.len()
            );
            ready.max_inflight
        }
        Some(ServerEvent::Error(notice)) => {
            bail!("Service refused stream: {} ({})", notice.message, notice.code.as_str())
        }
        Some(other) => bail!("Unexpected {} before stream:ready", other.name()),
        None => bail!("Service closed the connection"),
    };

    let mut dubbed: Vec<i16> = Vec::new();
    let mut output_format = (clip.sample_rate, clip.channels);
    let mut pending = fragments.into_iter().peekable();
    let mut outstanding = 0usize;
    let mut paused = false;
    let mut end_sent = false;
    let mut summary: Option<SessionSummary> = None;

    loop {
        if !paused && outstanding < max_inflight && pending.peek().is_some() {
            if let Some(fragment) = pending.next() {
                client.send(&ClientEvent::FragmentData(fragment)).await?;
                outstanding += 1;
            }
            continue;
        }
        if pending.peek().is_none() && !end_sent {
            client
                .send(&ClientEvent::StreamEnd {
                    stream_id: stream_id.clone(),
                })
                .await?;
            end_sent = true;
            continue;
        }

        let Some(event) = client.next_event().await? else {
            break;
        };
        match event {
            ServerEvent::FragmentAck(_) | ServerEvent::StreamReady(_) => {}
            ServerEvent::FragmentProcessed(result) => {
                outstanding = outstanding.saturating_sub(1);
                print_result(&result);
                let gap_ms = original_ms
                    .get(&result.sequence_number)
                    .copied()
                    .unwrap_or(0);
                append_audio(&result, gap_ms, &mut dubbed, &mut output_format);
            }
            ServerEvent::Backpressure(notice) => {
                paused = notice.state.action == FlowAction::Pause;
                eprintln!(
                    "{} {} in flight, {}",
                    "backpressure:".dimmed(),
                    notice.state.current_inflight,
                    notice.state.severity.as_str()
                );
            }
            ServerEvent::StreamComplete(complete) => {
                summary = Some(complete);
            }
            ServerEvent::Error(notice) => {
                eprintln!("{} {} ({})", "error:".red(), notice.message, notice.code.as_str());
            }
        }
    }

    if let Some(summary) = &summary {
        print_summary(summary);
    } else {
        eprintln!("{}", "Connection closed before stream:complete".yellow());
    }

    if let Some(output) = &request.output {
        write_wav_file(output, output_format.0, output_format.1, &dubbed)
            .with_context(|| format!("Failed to write {}", output.display()))?;
        eprintln!("{} {}", "Wrote".green(), output.display());
    }
    Ok(())
}

fn print_result(result: &FragmentResult) {
    let status = match result.status {
        Status::Success => "success".green().to_string(),
        Status::Partial => "partial".yellow().to_string(),
        Status::Failed => "failed".red().to_string(),
    };
    let detail = match (&result.error, &result.translated_text) {
        (Some(error), _) => format!("{} {}", error.code.as_str(), error.message.dimmed()),
        (None, Some(text)) if !text.is_empty() => text.clone(),
        (None, _) => "(no speech)".dimmed().to_string(),
    };
    println!(
        "[{:>4}] {:<7} {:>6}ms  {}",
        result.sequence_number, status, result.processing_time_ms, detail
    );
}

/// Appends the dubbed audio, or silence the length of the original when the
/// fragment failed, so the output keeps the input's timing.
fn append_audio(
    result: &FragmentResult,
    original_ms: u64,
    dubbed: &mut Vec<i16>,
    format: &mut (u32, u16),
) {
    match &result.audio {
        Some(audio) if audio.sample_rate > 0 => {
            *format = (audio.sample_rate, audio.channels);
            dubbed.extend(audio.samples());
        }
        _ => dubbed.extend(pcm::silence(format.0, format.1, original_ms)),
    }
}

fn print_summary(summary: &SessionSummary) {
    println!(
        "{} {} fragments in {}: {} success, {} partial, {} failed, {} rejected",
        "Done:".bold(),
        summary.answered(),
        humantime::format_duration(Duration::from_millis(summary.duration_ms)),
        summary.success.green(),
        summary.partial.yellow(),
        summary.failed.red(),
        summary.rejected
    );
    if let Some(latency) = &summary.latency {
        println!("  {}", latency.summary_line().dimmed());
    }
    for (code, count) in &summary.errors {
        println!("  {} {}", code.red(), count);
    }
    if !summary.skipped_sequences.is_empty() {
        println!("  skipped: {:?}", summary.skipped_sequences);
    }
}
