use std::collections::HashSet;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use storyforge::backlog;
use storyforge::cli::{Cli, Command, EventsMode, PlanArgs, RunArgs};
use storyforge::events::{EventEcho, EventEmitter};
use storyforge::gateway;
use storyforge::model::StoryStatus;
use storyforge::orchestrator::{group, is_eligible, DevelopmentLoop, EpicReport};
use storyforge::progress::{format_event, BoardStatus, ProgressBoard};
use storyforge::state::StateStore;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

/// Conventional exit status for a run ended by SIGINT
const EXIT_STOPPED: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli);

    let result = match cli.command {
        Command::Run(args) => run(args).await,
        Command::Plan(args) => plan(args),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(cli: &Cli) {
    let default = if cli.verbose {
        "storyforge=debug"
    } else if matches!(&cli.command, Command::Run(args) if args.events == EventsMode::Human) {
        // events are already printed line by line
        "storyforge=warn"
    } else {
        "storyforge=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(args: RunArgs) -> Result<ExitCode> {
    let config = args.resolve_config()?;

    let mut state = backlog::load(&args.backlog)?;
    for warning in backlog::validate(&state)? {
        tracing::warn!(%warning, "dependency warning");
    }
    let reset = backlog::reset_interrupted(&mut state);
    if !reset.is_empty() {
        tracing::info!(stories = ?reset, "returned interrupted stories to backlog");
    }

    let gateway = gateway::build(&config.agents, args.dry_run)?;
    let echo = match args.events {
        EventsMode::Json => EventEcho::Json,
        EventsMode::Human | EventsMode::Quiet => EventEcho::None,
    };
    let events = EventEmitter::new(echo);
    let store = StateStore::new(state);

    let stop_store = store.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stop_store.stop_handle().raise();
            eprintln!(
                "\n⏹ Stop requested, waiting for {} in-flight stories to finish their agent call...",
                stop_store.active_story_count().await
            );
        }
    });

    let printer = (args.events == EventsMode::Human).then(|| {
        let mut rx = events.subscribe();
        tokio::spawn(async move {
            let mut board = ProgressBoard::new();
            loop {
                match rx.recv().await {
                    Ok(record) => {
                        board.apply(&record.event);
                        println!("{}", format_event(&record.event));
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "event printer fell behind");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            board
        })
    });

    let dev_loop = DevelopmentLoop::new(gateway, store.clone(), events, &config);
    let outcome = dev_loop.run().await;
    // Closes the event channel so the printer finishes
    drop(dev_loop);

    let board = match printer {
        Some(handle) => handle.await.ok(),
        None => None,
    };

    backlog::save(args.output_path(), &store.snapshot().await)?;

    let (reports, code) = match &outcome {
        Ok(report) => {
            let code = if report.has_failures() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
            (report.epics.as_slice(), code)
        }
        Err(stop) => {
            eprintln!("⏹ {}", stop);
            (stop.finished.as_slice(), ExitCode::from(EXIT_STOPPED))
        }
    };

    match (&board, args.events) {
        (Some(board), _) => print_board(board),
        (None, EventsMode::Json) => {
            println!("{}", serde_json::to_string_pretty(reports)?);
        }
        _ => print_reports(reports),
    }
    println!("State saved to {}", args.output_path().display());

    Ok(code)
}

fn print_board(board: &ProgressBoard) {
    println!("\n========================================");
    if board.running() > 0 {
        println!("{} stories were stopped mid-run and returned to backlog", board.running());
    }
    for epic in &board.epics {
        println!(
            "{} ({}): {} passed, {} with known failures, {} failed, {} blocked{}",
            epic.id,
            epic.title,
            epic.count(BoardStatus::Passed),
            epic.count(BoardStatus::PassedWithKnownFailures),
            epic.count(BoardStatus::Failed),
            epic.count(BoardStatus::Blocked),
            if epic.finished { "" } else { " (interrupted)" }
        );
    }
}

fn print_reports(reports: &[EpicReport]) {
    for report in reports {
        println!(
            "{}: {} done, {} errored, {} blocked, peak concurrency {}",
            report.epic_id,
            report.completed.len(),
            report.errored.len(),
            report.blocked.len(),
            report.peak_concurrency
        );
    }
}

fn plan(args: PlanArgs) -> Result<ExitCode> {
    let state = backlog::load(&args.backlog)?;
    let warnings = backlog::validate(&state)?;

    let done: HashSet<String> = state
        .stories
        .iter()
        .filter(|s| s.status == StoryStatus::Done)
        .map(|s| s.id.clone())
        .collect();

    let groups = group(&state);
    if groups.is_empty() {
        println!("Nothing to do: no backlog stories.");
    }
    for (index, group) in groups.iter().enumerate() {
        println!(
            "{}. Epic {} ({}): {} stories",
            index + 1,
            group.epic.id,
            group.epic.title,
            group.stories.len()
        );
        for story in &group.stories {
            let marker = if is_eligible(story, &done) { "ready" } else { "waits" };
            if story.dependencies.is_empty() {
                println!("   [{}] {} {}", marker, story.id, story.title);
            } else {
                let deps: Vec<&str> = story.dependencies.iter().map(String::as_str).collect();
                println!(
                    "   [{}] {} {} (after {})",
                    marker,
                    story.id,
                    story.title,
                    deps.join(", ")
                );
            }
        }
    }

    if !warnings.is_empty() {
        println!();
        for warning in &warnings {
            println!("⚠ {}", warning);
        }
    }

    Ok(ExitCode::SUCCESS)
}
