//! Build session CLI commands: status, history, reset, send.

use std::io::Write;

use anyhow::{Context, Result};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use dialoguer::Confirm;
use tokio::sync::mpsc;

use pagewright_core::build::plan;
use pagewright_core::build::signal::determine_signal;
use pagewright_core::build::store::BuildSessionStore;
use pagewright_types::build::{
    BuildEvent, BuildMode, BuildTurnRequest, StepStatus, StreamEndSignal,
};
use pagewright_types::conversation::TurnRole;

use super::project::{load_project, stage_name};
use crate::state::AppState;
use crate::turn::{EVENT_BUFFER, prepare_turn, run_prepared};

/// Print per-stage progress and the signal the next turn would end with.
pub async fn build_status(state: &AppState, id: &str, json: bool) -> Result<()> {
    let project = load_project(state, id).await?;
    let session = state
        .sessions
        .load_session(&project.id)
        .await?
        .with_context(|| format!("no build session for '{}'", project.name))?;
    let signal = determine_signal(&session);

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "session": session,
                "signal": signal,
            }))?
        );
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Stage").fg(Color::White),
        Cell::new("Status").fg(Color::White),
        Cell::new("Checkpoint").fg(Color::White),
    ]);
    for (index, step) in session.steps.iter().enumerate() {
        let status = match step.status {
            StepStatus::Complete => Cell::new("● complete").fg(Color::Green),
            StepStatus::Active => Cell::new("◐ active").fg(Color::Yellow),
            StepStatus::Pending => Cell::new("○ pending").fg(Color::DarkGrey),
            StepStatus::Error => Cell::new("✗ error").fg(Color::Red),
        };
        let checkpoint = if plan::step(index).is_some_and(|d| d.is_checkpoint) {
            "yes"
        } else {
            ""
        };
        table.add_row(vec![Cell::new(stage_name(index)), status, Cell::new(checkpoint)]);
    }

    println!();
    println!(
        "  {} {}",
        style(&project.name).cyan().bold(),
        style(format!("({} mode)", session.mode)).dim()
    );
    println!();
    println!("{table}");
    if Some(session.current_step) == plan::sub_staged_step() {
        println!(
            "  {} {}",
            style("Section:").bold(),
            plan::section_label(session.current_substep)
        );
    }
    println!("  {} {}", style("Next:").bold(), describe_signal(&signal));
    println!();
    Ok(())
}

pub async fn build_history(state: &AppState, id: &str, json: bool) -> Result<()> {
    let project = load_project(state, id).await?;
    let history = state.sessions.load_history(&project.id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(history.turns())?);
        return Ok(());
    }

    if history.is_empty() {
        println!();
        println!("  {} No build conversation yet.", style("i").blue().bold());
        println!();
        return Ok(());
    }

    println!();
    for turn in history.turns() {
        let who = match turn.role {
            TurnRole::User => style("you").yellow().bold(),
            TurnRole::Assistant => style("agent").cyan().bold(),
        };
        println!(
            "  {} {}",
            who,
            style(turn.timestamp.format("%Y-%m-%d %H:%M")).dim()
        );
        for line in turn.content.lines() {
            println!("    {line}");
        }
        println!();
    }
    Ok(())
}

pub async fn build_reset(state: &AppState, id: &str, force: bool, json: bool) -> Result<()> {
    let project = load_project(state, id).await?;

    if !force && !json {
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Discard the build session and conversation for '{}'?",
                style(&project.name).red().bold()
            ))
            .default(false)
            .interact()?;
        if !confirmed {
            println!("  Cancelled.");
            return Ok(());
        }
    }

    state.sessions.delete_session(&project.id).await?;
    state.sessions.delete_history(&project.id).await?;

    if json {
        println!(
            "{}",
            serde_json::json!({"reset": true, "project_id": project.id})
        );
    } else {
        println!(
            "  {} Build for '{}' reset.",
            style("✓").red().bold(),
            project.name
        );
    }
    Ok(())
}

/// Turn shape from `build send` arguments.
pub fn turn_request(
    message: Option<String>,
    mode: Option<String>,
    step: Option<usize>,
    substep: Option<usize>,
) -> Result<BuildTurnRequest> {
    if let Some(mode) = mode {
        let mode = mode.parse::<BuildMode>().map_err(|e| anyhow::anyhow!(e))?;
        return Ok(BuildTurnRequest::ModeSelect { mode });
    }
    Ok(match message {
        Some(content) => BuildTurnRequest::User { content },
        None => BuildTurnRequest::Continue { step, substep },
    })
}

/// Run one turn in-process and print events as they arrive.
pub async fn build_send(
    state: &AppState,
    id: &str,
    request: BuildTurnRequest,
    json: bool,
    quiet: bool,
) -> Result<()> {
    let project = load_project(state, id).await?;
    let turn = prepare_turn(state, &project.id, &request).await?;

    let (tx, mut rx) = mpsc::channel(EVENT_BUFFER);
    let runner = tokio::spawn(run_prepared(turn, tx));

    let mut failure = None;
    let mut mid_line = false;
    while let Some(event) = rx.recv().await {
        if json {
            println!("{}", serde_json::to_string(&event)?);
            if let BuildEvent::Error { message } = event {
                failure = Some(message);
            }
            continue;
        }
        match event {
            BuildEvent::TextDelta { delta } => {
                if !quiet {
                    print!("{delta}");
                    std::io::stdout().flush()?;
                    mid_line = !delta.ends_with('\n');
                }
            }
            BuildEvent::AdvisorSegment { advisor, content } => {
                if !quiet {
                    if mid_line {
                        println!();
                        mid_line = false;
                    }
                    println!();
                    println!("  {} {}", style("advisor").magenta().bold(), style(&advisor).bold());
                    for line in content.lines() {
                        println!("  {} {line}", style("│").magenta());
                    }
                    println!();
                }
            }
            BuildEvent::End { signal } => {
                if mid_line {
                    println!();
                    mid_line = false;
                }
                if !quiet {
                    println!();
                    println!("  {} {}", style("Next:").bold(), describe_signal(&signal));
                }
            }
            BuildEvent::Error { message } => {
                if mid_line {
                    println!();
                    mid_line = false;
                }
                eprintln!("  {} {}", style("✗").red().bold(), message);
                failure = Some(message);
            }
        }
    }
    runner.await.context("build turn task panicked")?;

    match failure {
        Some(message) => anyhow::bail!("build turn failed: {message}"),
        None => Ok(()),
    }
}

/// One-line human description of an end signal.
pub fn describe_signal(signal: &StreamEndSignal) -> String {
    match signal {
        StreamEndSignal::Checkpoint { prompt, .. } => {
            format!("{prompt}. Reply with feedback or continue.")
        }
        StreamEndSignal::Continue { step } => {
            format!("continue to keep working on {}", stage_name(*step))
        }
        StreamEndSignal::Poll { poll_url, .. } => format!("deployment running, poll {poll_url}"),
        StreamEndSignal::Complete { result } => match result.get("siteUrl").and_then(|u| u.as_str()) {
            Some(url) => format!("complete, live at {url}"),
            None => "complete".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turn_request_from_args() {
        assert_eq!(
            turn_request(None, Some("autonomous".into()), None, None).unwrap(),
            BuildTurnRequest::ModeSelect {
                mode: BuildMode::Autonomous
            }
        );
        assert_eq!(
            turn_request(Some("shorter".into()), None, None, None).unwrap(),
            BuildTurnRequest::User {
                content: "shorter".into()
            }
        );
        assert_eq!(
            turn_request(None, None, Some(2), Some(1)).unwrap(),
            BuildTurnRequest::Continue {
                step: Some(2),
                substep: Some(1)
            }
        );
        assert!(turn_request(None, Some("manual".into()), None, None).is_err());
    }

    #[test]
    fn test_describe_signal() {
        let signal = StreamEndSignal::Complete {
            result: serde_json::json!({"siteUrl": "http://localhost:3000/sites/x/"}),
        };
        assert_eq!(
            describe_signal(&signal),
            "complete, live at http://localhost:3000/sites/x/"
        );
        assert_eq!(
            describe_signal(&StreamEndSignal::Continue { step: 1 }),
            "continue to keep working on 2. Wireframe"
        );
    }
}
