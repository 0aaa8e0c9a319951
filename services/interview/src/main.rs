use anyhow::{Context, Result};
use clap::Parser;
use interview_core::{ReportStatus, SessionController, SessionEvent, Services};
use interview_service::camera::ImageDirCamera;
use interview_service::config::Config;
use interview_service::control;
use interview_service::console::{ConsoleCommand, ConsoleRecognizer, END_COMMAND, QUIT_COMMAND};
use interview_service::http::{
    HttpChat, HttpEmotionAnalyzer, HttpFinalizeService, HttpGazeAnalyzer, HttpGazeReports,
    HttpSynthesizer, HttpTranscriptStore, build_client,
};
use interview_service::prompt_loader::Prompts;
use interview_service::speaker::SpeakerPlayer;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::fmt::time::ChronoLocal;

#[derive(Parser)]
#[command(version, about = "Voice interview session with live gaze and emotion sampling")]
struct Cli {
    /// Directory holding system_prompt.md and opening_line.md
    #[arg(long, default_value = "prompts")]
    prompts: PathBuf,
    /// Directory of JPEG frames used as the webcam (overrides FRAMES_DIR)
    #[arg(long)]
    frames: Option<PathBuf>,
    /// Disable webcam sampling for this session
    #[arg(long)]
    no_visual: bool,
    /// Name of the audio output device (defaults to the system default)
    #[arg(long)]
    output_device: Option<String>,
    /// List the audio output devices and exit
    #[arg(long)]
    list_outputs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // --- 1. Load Configuration ---
    let mut config = Config::from_env().context("Failed to load application configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(ChronoLocal::rfc_3339())
        .init();

    // --- 3. Parse Command-Line Arguments ---
    let args = Cli::parse();
    if args.list_outputs {
        println!("{}", interview_native_utils::device::get_available_outputs()?);
        return Ok(());
    }
    if let Some(frames) = args.frames {
        config.frames_dir = frames;
    }
    if args.no_visual {
        config.visual_sampling = false;
    }
    tracing::info!("Configuration loaded successfully. Starting interview service...");

    // --- 4. Load Prompts ---
    let prompts = Prompts::load(&args.prompts).context("Failed to load prompts")?;

    // --- 5. Wire the services ---
    let client = build_client(config.http_timeout)?;
    let (recognizer_tx, recognizer_rx) = mpsc::channel(32);
    let (command_tx, mut command_rx) = mpsc::channel::<ConsoleCommand>(8);
    let recognizer = ConsoleRecognizer::spawn(
        BufReader::new(tokio::io::stdin()),
        recognizer_tx,
        command_tx,
    );

    let services = Services {
        recognizer,
        synthesizer: Arc::new(HttpSynthesizer::new(client.clone(), &config.tts_url)),
        player: Arc::new(SpeakerPlayer::new(args.output_device)),
        chat: Arc::new(HttpChat::new(client.clone(), &config.chat_url)),
        camera: Arc::new(ImageDirCamera::new(&config.frames_dir)),
        gaze: Arc::new(HttpGazeAnalyzer::new(client.clone(), &config.gaze_capture_url)),
        emotion: Arc::new(HttpEmotionAnalyzer::new(client.clone(), &config.emotion_url)),
        gaze_reports: Arc::new(HttpGazeReports::new(client.clone(), &config.gaze_report_url)),
        transcripts: Arc::new(HttpTranscriptStore::new(client.clone(), &config.transcript_url)),
        finalize: Some(Arc::new(HttpFinalizeService::new(client, &config.finalize_url))),
    };
    let controller = Arc::new(SessionController::new(
        config.session_config(&prompts),
        services,
    ));

    // --- 6. Optional control API ---
    let shutdown = CancellationToken::new();
    if let Some(address) = config.control_address {
        let controller = controller.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = control::serve(address, controller, shutdown).await {
                tracing::error!("Control API stopped: {:#}", e);
            }
        });
    }

    let printer = tokio::spawn(print_events(controller.subscribe()));

    // --- 7. Run the session ---
    let session_id = controller
        .start()
        .await
        .context("Failed to start the session")?;
    println!(
        "Session {session_id} started. Type your answers, a blank line to pass, {END_COMMAND} to finish with a report, {QUIT_COMMAND} to leave."
    );

    let run_loop = controller.run(recognizer_rx);
    tokio::pin!(run_loop);
    let manual = tokio::select! {
        _ = &mut run_loop => {
            tracing::info!("Input closed, ending the session");
            false
        }
        command = command_rx.recv() => matches!(command, Some(ConsoleCommand::End)),
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, ending the session");
            false
        }
    };

    if controller.end(manual).await == ReportStatus::AggregationPending {
        println!("Generating your session report...");
        tokio::select! {
            results = controller.results() => {
                if let Some(results) = results {
                    println!("{}", serde_json::to_string_pretty(results.as_ref())?);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                controller.shutdown().await;
                if let Some(results) = controller.results().await {
                    println!("{}", serde_json::to_string_pretty(results.as_ref())?);
                }
            }
        }
    }

    controller.shutdown().await;
    shutdown.cancel();
    printer.abort();
    tracing::info!("Interview service stopped");
    Ok(())
}

/// Renders the session's events on the console.
async fn print_events(mut events: broadcast::Receiver<SessionEvent>) {
    loop {
        match events.recv().await {
            Ok(SessionEvent::AssistantReply { text }) => println!("AI: {text}"),
            Ok(SessionEvent::Utterance { text }) => println!("You: {text}"),
            Ok(SessionEvent::Notice { message }) => println!("(!) {message}"),
            Ok(SessionEvent::Ended { session_id }) => println!("Session {session_id} ended."),
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(_)) => {}
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
