//! CLI binary for vela.
//!
//! Subcommands:
//! - `voice` (default): run the live voice session until Ctrl-C.
//! - `ask <text>`: run one pipeline turn and print the outcome.
//! - `say <text>`: synthesize speech for `text` and play it.
//! - `devices`: list audio devices.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::EnvFilter;
use vela::audio::capture::AudioCaptureEncoder;
use vela::audio::playback::RemoteAudioPlayer;
use vela::backend::http::WalletBackend;
use vela::{
    AgentConfig, AgentEvent, IntentActionPipeline, PipelineCollaborators,
    SessionLifecycleController, TurnOutcome, TurnRequest,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Suppress noisy dependency logs by default; override with RUST_LOG.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vela=info")),
        )
        .init();

    let config = load_config()?;

    let mut args = std::env::args().skip(1);
    let command = args.next().unwrap_or_else(|| "voice".to_owned());
    let rest: Vec<String> = args.collect();

    match command.as_str() {
        "voice" => run_voice(config).await,
        "ask" => run_ask(config, rest.join(" ")).await,
        "say" => run_say(config, rest.join(" ")).await,
        "devices" => list_devices(),
        other => {
            eprintln!("unknown command: {other}");
            eprintln!("usage: vela [voice|ask <text>|say <text>|devices]");
            std::process::exit(2);
        }
    }
}

fn load_config() -> anyhow::Result<AgentConfig> {
    let path = AgentConfig::default_config_path();
    if path.exists() {
        Ok(AgentConfig::from_file(&path)?)
    } else {
        Ok(AgentConfig::default())
    }
}

async fn run_voice(config: AgentConfig) -> anyhow::Result<()> {
    println!("Vela v{}", env!("CARGO_PKG_VERSION"));

    let (events_tx, mut events_rx) = broadcast::channel::<AgentEvent>(64);
    let controller = SessionLifecycleController::new(&config).with_events(events_tx);

    // Print session messages and state changes; mic levels stay silent.
    let printer = tokio::spawn(async move {
        while let Ok(event) = events_rx.recv().await {
            match event {
                AgentEvent::SessionState(state) => info!("session state: {state:?}"),
                AgentEvent::SessionMessage { text } => println!("{text}"),
                _ => {}
            }
        }
    });

    controller.start().await?;
    println!("Voice session running. Press Ctrl-C to stop.");

    tokio::signal::ctrl_c().await?;
    controller.stop().await;
    printer.abort();
    println!("Stopped.");
    Ok(())
}

async fn run_ask(config: AgentConfig, text: String) -> anyhow::Result<()> {
    if text.trim().is_empty() {
        anyhow::bail!("usage: vela ask <text>");
    }

    let backend = Arc::new(WalletBackend::new(&config.backend)?);
    let pipeline = IntentActionPipeline::new(
        &config.pipeline,
        PipelineCollaborators {
            parser: backend.clone(),
            optimizer: backend.clone(),
            resolver: backend.clone(),
            generator: backend.clone(),
            store: backend,
        },
    );

    let request = TurnRequest {
        text,
        address: std::env::var("VELA_ADDRESS").unwrap_or_default(),
        user_id: std::env::var("VELA_USER_ID").unwrap_or_else(|_| "cli".to_owned()),
        image_base64: None,
    };

    match pipeline.handle_turn(request).await {
        TurnOutcome::Action(plan) => {
            println!("Proposed action [{}]: {}", plan.kind, plan.summary);
            println!("{}", serde_json::to_string_pretty(&plan.payload)?);
        }
        TurnOutcome::Answer(answer) => println!("{answer}"),
        TurnOutcome::Failed(message) => println!("{message}"),
    }
    Ok(())
}

async fn run_say(config: AgentConfig, text: String) -> anyhow::Result<()> {
    if text.trim().is_empty() {
        anyhow::bail!("usage: vela say <text>");
    }

    let backend = WalletBackend::new(&config.backend)?;
    use vela::backend::SpeechGenerator;
    let audio = backend.generate_speech(&text).await?;

    let mut player = RemoteAudioPlayer::new(&config.audio)?;
    player.start()?;
    let handle = player.handle();
    handle.enqueue_base64(&audio, config.audio.output_sample_rate)?;

    while handle.active_sources() > 0 {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    Ok(())
}

fn list_devices() -> anyhow::Result<()> {
    println!("Input devices:");
    for name in AudioCaptureEncoder::list_input_devices()? {
        println!("  {name}");
    }
    println!("Output devices:");
    for name in RemoteAudioPlayer::list_output_devices()? {
        println!("  {name}");
    }
    Ok(())
}
