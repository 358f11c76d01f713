//! visionclerk - live object detection client
//!
//! This program:
//! 1. Loads the detection model and activates the camera
//! 2. Runs the detection loop, rendering an overlay after every inference
//! 3. Saves the current detections to the detection store on request
//! 4. Shows the saved history, newest first

use anyhow::{anyhow, Result};
use clap::Parser;
use std::io::{BufRead, IsTerminal};
use std::path::PathBuf;
use std::sync::{mpsc, Arc};

use vision_clerk::{
    config::ClientConfig,
    overlay::CanvasSink,
    HistorySynchronizer, HttpPersistenceClient, RefreshOutcome, SaveOutcome, Session, StageEvent,
};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about = "Live object detection with a saved detection history")]
struct Args {
    /// Detection store base URL (overrides VISION_CLERK_API_URL).
    #[arg(long)]
    api_url: Option<String>,

    /// Capture source: stub://<name> or a directory of images.
    #[arg(long)]
    source: Option<String>,

    /// Detector backend (stub|tract).
    #[arg(long)]
    detector: Option<String>,

    /// ONNX model path for the tract backend.
    #[arg(long)]
    model: Option<PathBuf>,

    /// Write the annotated frame to this JPEG file.
    #[arg(long)]
    overlay: Option<PathBuf>,

    /// UI mode: auto, plain, pretty.
    #[arg(long, default_value = "auto")]
    ui: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Command {
    Save,
    Refresh,
    Predictions,
    History,
    Help,
    Quit,
}

impl Command {
    fn parse(line: &str) -> Option<Self> {
        match line.trim().to_lowercase().as_str() {
            "s" | "save" => Some(Command::Save),
            "r" | "refresh" => Some(Command::Refresh),
            "p" | "predictions" => Some(Command::Predictions),
            "h" | "history" => Some(Command::History),
            "?" | "help" => Some(Command::Help),
            "q" | "quit" | "exit" => Some(Command::Quit),
            _ => None,
        }
    }
}

const HELP: &str = "commands: [s]ave  [r]efresh history  [p]redictions  [h]istory  [q]uit";

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut cfg = ClientConfig::load()?;
    if let Some(url) = args.api_url {
        cfg.api_url = url;
    }
    if let Some(source) = args.source {
        cfg.capture.source = source;
    }
    if let Some(detector) = args.detector {
        cfg.detector.backend = detector.to_lowercase();
    }
    if let Some(model) = args.model {
        cfg.detector.model_path = Some(model);
    }
    if let Some(overlay) = args.overlay {
        cfg.overlay_path = Some(overlay);
    }
    cfg.validate()?;

    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = ui::Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);

    let client = HttpPersistenceClient::new(&cfg.api_url, cfg.http_timeout)?;
    log::info!("detection store endpoint {}", client.endpoint());
    let history = Arc::new(HistorySynchronizer::new(Arc::new(client)));

    // History is independent of the camera and model.
    {
        let history = history.clone();
        std::thread::spawn(move || {
            history.refresh();
        });
    }

    let sink = Box::new(CanvasSink::new(cfg.overlay_path.clone()));
    let mut stage: Option<ui::StageGuard> = None;
    let session = Session::start(&cfg, sink, |event| match event {
        StageEvent::Started(message) => stage = Some(ui.stage(message)),
        StageEvent::Done => stage = None,
        StageEvent::Failed(message) => {
            if let Some(guard) = stage.take() {
                guard.fail(message);
            }
        }
    });
    drop(stage);

    let state = session.status().snapshot();
    if !state.can_run() {
        eprintln!("{}", state.status_message);
    }

    let (tx, rx) = mpsc::channel();
    {
        let tx = tx.clone();
        ctrlc::set_handler(move || {
            let _ = tx.send(Command::Quit);
        })
        .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;
    }
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            match Command::parse(&line) {
                Some(command) => {
                    if tx.send(command).is_err() {
                        break;
                    }
                }
                None if line.trim().is_empty() => {}
                None => eprintln!("unknown command '{}'; {}", line.trim(), HELP),
            }
        }
        let _ = tx.send(Command::Quit);
    });

    eprintln!("{}", HELP);
    while let Ok(command) = rx.recv() {
        match command {
            Command::Save => save(&history, session.predictions().labels()),
            Command::Refresh => {
                let history = history.clone();
                std::thread::spawn(move || match history.refresh() {
                    RefreshOutcome::Applied { entries } => println!("History: {} entries.", entries),
                    RefreshOutcome::Superseded => {}
                    RefreshOutcome::Failed(err) => eprintln!("Refresh failed: {:#}", err),
                });
            }
            Command::Predictions => {
                let state = session.status().snapshot();
                if !state.can_run() {
                    println!("{}", state.status_message);
                } else {
                    println!("{}", ui::format_predictions(&session.predictions().get()));
                }
            }
            Command::History => println!("{}", ui::format_history(&history.history())),
            Command::Help => eprintln!("{}", HELP),
            Command::Quit => break,
        }
    }

    log::info!("shutting down (stats: {:?})", session.stats());
    session.stop()?;
    Ok(())
}

fn save(history: &Arc<HistorySynchronizer>, labels: Vec<String>) {
    if labels.is_empty() {
        println!("Nothing detected; nothing to save.");
        return;
    }
    if history.is_saving() {
        println!("A save is already in progress.");
        return;
    }
    let history = history.clone();
    std::thread::spawn(move || match history.save(&labels) {
        SaveOutcome::Saved(snapshot) => {
            println!("Saved: {}", snapshot.objects.join(", "));
        }
        SaveOutcome::Empty => println!("Nothing detected; nothing to save."),
        SaveOutcome::Busy => println!("A save is already in progress."),
        SaveOutcome::Failed(err) => eprintln!("Save failed: {:#}", err),
    });
}
