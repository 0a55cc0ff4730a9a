//! # FretFlow - Terminal Fretboard Trainer
//!
//! Asks for a note, listens through the input device, and tells the player
//! whether the note they played was the target, its major third, its
//! perfect fifth, or something else.
//!
//! ## Architecture
//! - **Main Thread**: terminal loop rendering trainer events and the level
//! - **Analysis Thread**: owned by [`Trainer`], captures and analyses audio
//! - **Input Thread**: reads keyboard commands line by line
//! - **Communication**: crossbeam channels between all three

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, select, tick};
use fretflow_core::relationship::related_pitch_classes;
use fretflow_core::{FeedbackState, Settings, TargetSpec, Trainer, TrainerEvent};
use std::io::{self, BufRead, Write};
use std::thread;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

// Level meter redraw rate
const LEVEL_REFRESH: Duration = Duration::from_millis(100);
const METER_WIDTH: usize = 30;

/// Keyboard commands read from stdin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Hint,
    Stats,
    Restart,
    Quit,
}

impl Command {
    fn parse(line: &str) -> Option<Self> {
        match line.trim() {
            "h" | "hint" => Some(Command::Hint),
            "s" | "stats" => Some(Command::Stats),
            "r" | "restart" => Some(Command::Restart),
            "q" | "quit" | "exit" => Some(Command::Quit),
            _ => None,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let settings = Settings::load().context("failed to load settings")?;
    info!(
        strings = ?settings.session.active_strings,
        difficulty = ?settings.session.difficulty,
        "loaded settings"
    );

    let mut trainer = Trainer::from_settings(settings);
    let events = trainer.events();
    let commands = spawn_input_thread();

    println!("FretFlow. Commands: h = hint, s = stats, r = restart, q = quit");
    // The first prompt arrives as a TargetChanged event.
    trainer
        .start_session()
        .context("could not start a session on the audio input")?;

    let ticker = tick(LEVEL_REFRESH);
    loop {
        select! {
            recv(events) -> event => {
                let Ok(event) = event else { break };
                if !handle_event(&trainer, event) {
                    println!();
                    println!("Session ended. Press r to restart or q to quit.");
                }
            },
            recv(commands) -> command => match command {
                Ok(Command::Hint) => match trainer.request_hint() {
                    Some(target) => {
                        println!();
                        println!("Hint: {} is fret {} on the {} string", target.pitch_class, target.fret(), target.string);
                    }
                    None => println!("No session running."),
                },
                Ok(Command::Stats) => print_stats(&trainer),
                Ok(Command::Restart) => {
                    trainer.stop_session();
                    // Drop the old session's trailing events.
                    while events.try_recv().is_ok() {}
                    if let Err(err) = trainer.start_session() {
                        warn!(error = %err, "restart failed");
                    }
                }
                Ok(Command::Quit) | Err(_) => break,
            },
            recv(ticker) -> _ => {
                if trainer.is_running() {
                    draw_level(trainer.current_level(), trainer.feedback_state());
                }
            },
        }
    }

    trainer.stop_session();
    println!();
    print_stats(&trainer);
    Ok(())
}

/// Reads stdin on its own thread so the main loop never blocks on input.
fn spawn_input_thread() -> Receiver<Command> {
    let (tx, rx) = crossbeam_channel::unbounded();
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            match Command::parse(&line) {
                Some(command) => {
                    if tx.send(command).is_err() || command == Command::Quit {
                        break;
                    }
                }
                None if line.trim().is_empty() => {}
                None => eprintln!("unknown command `{}`", line.trim()),
            }
        }
        // Dropping the sender on EOF ends the main loop.
    });
    rx
}

/// Renders one event. Returns `false` once the session has ended.
fn handle_event(trainer: &Trainer, event: TrainerEvent) -> bool {
    match event {
        TrainerEvent::TargetChanged(target) => print_prompt(&target),
        TrainerEvent::Feedback(state) => {
            let heard = trainer
                .last_detected_note()
                .map(|note| note.to_string())
                .unwrap_or_else(|| "-".into());
            match state {
                FeedbackState::Correct => {
                    if let Some(target) = trainer.target() {
                        let (third, fifth) = related_pitch_classes(target.pitch_class);
                        println!();
                        println!("Correct! ({heard})  Its third is {third}, its fifth is {fifth}.");
                    }
                }
                FeedbackState::Incorrect => {
                    println!();
                    println!("Not quite, heard {heard}.");
                }
                FeedbackState::RelatedThird => {
                    println!();
                    println!("Close: {heard} is the major third of the target.");
                }
                FeedbackState::RelatedFifth => {
                    println!();
                    println!("Close: {heard} is the perfect fifth of the target.");
                }
                FeedbackState::Idle | FeedbackState::Listening => {}
            }
        }
        TrainerEvent::DeviceError(err) => {
            println!();
            println!("Audio device error: {err}");
        }
        TrainerEvent::SessionEnded => return false,
    }
    true
}

fn print_prompt(target: &TargetSpec) {
    println!();
    println!("Find {target}");
}

fn print_stats(trainer: &Trainer) {
    let stats = trainer.stats();
    let average = stats
        .average_time()
        .map(|t| format!("{:.1}s", t.as_secs_f32()))
        .unwrap_or_else(|| "-".into());
    println!(
        "Rounds: {}  Average time: {}  Incorrect: {}  Related: {}  Dropped samples: {}",
        stats.rounds_completed,
        average,
        stats.incorrect,
        stats.related,
        trainer.snapshot().dropped_samples
    );
}

fn draw_level(level: f32, state: FeedbackState) {
    let filled = ((level.clamp(0.0, 1.0) * METER_WIDTH as f32).round() as usize).min(METER_WIDTH);
    print!(
        "\r[{}{}] {:?}        ",
        "#".repeat(filled),
        " ".repeat(METER_WIDTH - filled),
        state
    );
    let _ = io::stdout().flush();
}
