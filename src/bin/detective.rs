//! detective-live binary
//!
//! Terminal front end for the escape-room detective: builds the bedroom,
//! wires the game tools into an agent session, and talks to the hosted live
//! model over WebSocket. Lines typed on stdin are sent as turns.
//!
//! ## Configuration (env / TOML via `config` crate)
//!
//! | Key                          | Default                        | Description                         |
//! |------------------------------|--------------------------------|-------------------------------------|
//! | `GEMINI_API_KEYS`            | –                              | Comma-separated credential list     |
//! | `GEMINI_API_KEY`, `…KEY1..4` | –                              | Individual credentials              |
//! | `DETECTIVE_CONFIG`           | –                              | Optional TOML file with the above   |
//! | `DETECTIVE_MODEL`            | `models/gemini-2.0-flash-exp`  | Model sent in the setup message     |
//! | `DETECTIVE_ENDPOINT`         | Gemini live endpoint           | WebSocket URL (key appended)        |
//! | `DETECTIVE_MODALITY`         | `audio`                        | Reply modality (`audio` or `text`)  |
//! | `DETECTIVE_SNAPSHOT_NODES`   | `120`                          | Snapshot cap per outgoing turn      |
//! | `DETECTIVE_CONNECT_TIMEOUT_MS` | `10000`                      | Per-credential attempt bound        |
//! | `DETECTIVE_ROTATION_DELAY_MS`  | `1000`                       | Wait before reconnecting after a rejected key |
//! | `DETECTIVE_WAV_OUT`          | –                              | Write all played speech to this WAV |
//!
//! ## Commands
//!
//! `/voice <file> [transcript…]`, `/snapshot`, `/inventory`, `/status`,
//! `/reconnect`, `/disconnect`, `/quit`. Anything else is sent as text.

use anyhow::{Context, Result};
use clap::Parser;
use detective_live::{
    audio::{AudioScheduler, ClockedOutput, SystemClock, OUTPUT_SAMPLE_RATE},
    capture::VoiceRecorder,
    credentials::CredentialSources,
    escape_room::EscapeRoom,
    session::{AgentSession, CloseAction, Role, SessionEvent},
    tools::ToolRegistry,
    transport::{GeminiConnector, DEFAULT_ENDPOINT},
    types::{ResponseModality, SessionConfig},
    wav::WavAccumulator,
};
use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "detective-live", about = "Escape-room detective over a live model session")]
struct Args {
    /// Optional TOML file with credential keys
    #[arg(long, env = "DETECTIVE_CONFIG")]
    config: Option<String>,

    /// Model identifier
    #[arg(long, env = "DETECTIVE_MODEL", default_value = "models/gemini-2.0-flash-exp")]
    model: String,

    /// WebSocket endpoint
    #[arg(long, env = "DETECTIVE_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    endpoint: String,

    /// Reply modality: audio or text
    #[arg(long, env = "DETECTIVE_MODALITY", default_value = "audio")]
    modality: ResponseModality,

    /// Named nodes attached to every outgoing turn
    #[arg(long, env = "DETECTIVE_SNAPSHOT_NODES", default_value_t = 120)]
    snapshot_nodes: usize,

    /// Upper bound on one credential attempt (ms)
    #[arg(long, env = "DETECTIVE_CONNECT_TIMEOUT_MS", default_value_t = 10_000)]
    connect_timeout_ms: u64,

    /// Delay before reconnecting after a rejected credential (ms)
    #[arg(long, env = "DETECTIVE_ROTATION_DELAY_MS", default_value_t = 1_000)]
    rotation_delay_ms: u64,

    /// Frame rate of the player mover and audio poll
    #[arg(long, env = "DETECTIVE_TICK_HZ", default_value_t = 30.0)]
    tick_hz: f32,

    /// Dump every played speech fragment into this WAV file on exit
    #[arg(long, env = "DETECTIVE_WAV_OUT")]
    wav_out: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("detective_live=debug".parse()?),
        )
        .init();

    let args = Args::parse();
    info!("Detective starting (model={}, modality={:?})", args.model, args.modality);

    let credentials = CredentialSources::load(args.config.as_deref())
        .context("loading credentials")?
        .candidates();

    let room = EscapeRoom::build();
    let mut tools = ToolRegistry::new();
    room.register_tools(&mut tools);

    let capture = Rc::new(RefCell::new(WavAccumulator::new(OUTPUT_SAMPLE_RATE)));
    let mut output = ClockedOutput::new(SystemClock::default());
    if args.wav_out.is_some() {
        output = output.with_capture(capture.clone());
    }

    let config = SessionConfig {
        model: args.model.clone(),
        response_modality: args.modality,
        turn_snapshot_nodes: args.snapshot_nodes,
        connect_timeout: Duration::from_millis(args.connect_timeout_ms),
        ..SessionConfig::default()
    };

    let (connector, mut channel_events) = GeminiConnector::new(args.endpoint.clone());
    let mut session = AgentSession::new(config, connector, credentials, room.world().clone())
        .with_tools(tools)
        .with_audio(AudioScheduler::new(Box::new(output)));

    connect(&mut session).await;

    let rotation_delay = Duration::from_millis(args.rotation_delay_ms);
    let frame = Duration::from_secs_f32(1.0 / args.tick_hz.max(1.0));
    let mut tick = tokio::time::interval(frame);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            Some(event) = channel_events.recv() => {
                match session.handle_event(event) {
                    Some(CloseAction::RotateCredential) => {
                        tokio::time::sleep(rotation_delay).await;
                        connect(&mut session).await;
                    }
                    Some(CloseAction::Closed) => println!("[disconnected: /reconnect to retry]"),
                    Some(CloseAction::CredentialsExhausted) => println!("[all credentials refused]"),
                    Some(CloseAction::Ignored) | None => {}
                }
            }
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        if !run_command(&mut session, &room, line.trim()).await {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        error!("stdin: {}", e);
                        break;
                    }
                }
            }
            _ = tick.tick() => {
                room.step(frame.as_secs_f32());
                session.poll_audio();
                render(&mut session);
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    session.disconnect();
    render(&mut session);

    if let Some(path) = &args.wav_out {
        let wav = capture.borrow_mut().take_wav();
        std::fs::write(path, &wav).with_context(|| format!("writing {}", path.display()))?;
        info!("Wrote {} bytes of speech to {}", wav.len(), path.display());
    }

    Ok(())
}

async fn connect(session: &mut AgentSession<GeminiConnector>) {
    if let Err(e) = session.connect().await {
        warn!("Connect failed: {}", e);
    }
    render(session);
}

/// Returns false when the user asked to quit.
async fn run_command(session: &mut AgentSession<GeminiConnector>, room: &EscapeRoom, line: &str) -> bool {
    let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
    match command {
        "" => {}
        "/quit" => return false,
        "/voice" => {
            if let Err(e) = send_voice(session, rest).await {
                println!("[voice failed: {:#}]", e);
            }
        }
        "/snapshot" => {
            let cap = session.config().turn_snapshot_nodes;
            println!("{}", room.world().borrow().get_snapshot_text(cap));
        }
        "/inventory" => println!("[inventory: {:?}]", room.inventory()),
        "/status" => println!(
            "[{:?}, key #{}/{}, processing={}, speaking={}, error={:?}]",
            session.status(),
            session.active_credential_index() + 1,
            session.total_credentials(),
            session.is_processing(),
            session.is_speaking(),
            session.connection_error()
        ),
        "/reconnect" => connect(session).await,
        "/disconnect" => session.disconnect(),
        _ if !session.is_connected() => println!("[not connected]"),
        _ => session.send_text(line),
    }
    render(session);
    true
}

async fn send_voice(session: &mut AgentSession<GeminiConnector>, rest: &str) -> Result<()> {
    let (path, transcript) = rest.split_once(' ').unwrap_or((rest, ""));
    anyhow::ensure!(!path.is_empty(), "usage: /voice <file> [transcript]");
    let audio = std::fs::read(path).with_context(|| format!("reading {}", path))?;

    let mut recorder = VoiceRecorder::new(session.config().voice_mime_type.clone());
    let transcripts = recorder.transcript_sink();
    recorder.start();
    recorder.push_chunk(&audio);
    transcripts.push(transcript, true);
    let settle = session.config().transcript_settle;
    if let Some(utterance) = recorder.finish(settle).await {
        session.send_utterance(&utterance);
    }
    Ok(())
}

fn render(session: &mut AgentSession<GeminiConnector>) {
    for event in session.drain_events(64) {
        match event {
            SessionEvent::MessageAppended(m) => match m.role {
                Role::User => println!("you: {}", m.text),
                Role::Assistant => println!("detective: {}", m.text),
            },
            SessionEvent::StatusChanged(s) => println!("[{:?}]", s),
            SessionEvent::ThoughtUpdated(t) => println!("[thought/{:?}] {}", t.priority, t.thought),
            SessionEvent::Error(e) => println!("[error] {}", e),
            SessionEvent::ProcessingChanged(_) | SessionEvent::SpeakingChanged(_) => {}
        }
    }
}
