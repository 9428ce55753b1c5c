//! Project CLI commands: create, list, show.

use anyhow::{Context, Result};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use dialoguer::Input;

use pagewright_core::build::plan;
use pagewright_core::build::store::BuildSessionStore;
use pagewright_core::repository::SortOrder;
use pagewright_core::repository::project::{ProjectFilter, ProjectRepository};
use pagewright_types::project::{CreateProjectRequest, Project, ProjectId};

use crate::state::AppState;

/// Create a project from flags, prompting for anything missing.
///
/// # Examples
///
/// ```bash
/// pagewright project create --name "Acme Widgets" --description "Widgets for small teams"
/// ```
pub async fn create_project(
    state: &AppState,
    name: Option<String>,
    description: Option<String>,
    json: bool,
) -> Result<()> {
    let name = match name {
        Some(n) => n,
        None => Input::<String>::new()
            .with_prompt("Project name")
            .interact_text()?,
    };
    let description = match description {
        Some(d) => Some(d),
        None if json => None,
        None => Some(
            Input::<String>::new()
                .with_prompt("Short description (optional)")
                .allow_empty(true)
                .interact_text()?,
        ),
    };

    let project = CreateProjectRequest { name, description }.into_project()?;
    let project = state.projects.create(&project).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&project)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Created project {}",
        style("✓").green().bold(),
        style(&project.name).cyan()
    );
    println!("    {} {}", style("ID:").bold(), style(project.id).dim());
    println!();
    println!(
        "  Start a build with: {}",
        style(format!(
            "pagewright build send {} --mode interactive",
            project.id
        ))
        .yellow()
    );
    println!();
    Ok(())
}

pub async fn list_projects(
    state: &AppState,
    order: &str,
    limit: Option<i64>,
    json: bool,
) -> Result<()> {
    let sort_order = match order.to_lowercase().as_str() {
        "asc" => SortOrder::Asc,
        "desc" => SortOrder::Desc,
        other => anyhow::bail!("invalid order '{other}', expected asc or desc"),
    };
    let projects = state
        .projects
        .list(Some(ProjectFilter {
            sort_order: Some(sort_order),
            limit,
            offset: None,
        }))
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&projects)?);
        return Ok(());
    }

    if projects.is_empty() {
        println!();
        println!(
            "  {} No projects yet. Create one with: {}",
            style("i").blue().bold(),
            style("pagewright project create").yellow()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Name").fg(Color::White),
        Cell::new("ID").fg(Color::White),
        Cell::new("Stage").fg(Color::White),
        Cell::new("Created").fg(Color::White),
    ]);

    for project in &projects {
        let stage = match state.sessions.load_session(&project.id).await? {
            Some(session) if session.is_finished() => Cell::new("● live").fg(Color::Green),
            Some(session) => Cell::new(format!(
                "{} ({})",
                stage_name(session.current_step),
                session.mode
            ))
            .fg(Color::Yellow),
            None => Cell::new("○ not started").fg(Color::DarkGrey),
        };
        table.add_row(vec![
            Cell::new(&project.name).fg(Color::Cyan),
            Cell::new(project.id.to_string()).fg(Color::DarkGrey),
            stage,
            Cell::new(project.created_at.format("%Y-%m-%d %H:%M").to_string()),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    println!(
        "  {} project{}",
        style(projects.len()).bold(),
        if projects.len() == 1 { "" } else { "s" }
    );
    println!();
    Ok(())
}

pub async fn show_project(state: &AppState, id: &str, json: bool) -> Result<()> {
    let project = load_project(state, id).await?;
    let session = state.sessions.load_session(&project.id).await?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "project": project,
                "session": session,
            }))?
        );
        return Ok(());
    }

    println!();
    println!("  {}", style(&project.name).cyan().bold());
    if let Some(description) = &project.description {
        println!("  {}", style(description).dim());
    }
    println!();
    println!("  {}", style("── Details ──").dim());
    println!("    {} {}", style("ID:").bold(), style(project.id).dim());
    println!(
        "    {} {}",
        style("Created:").bold(),
        project.created_at.format("%Y-%m-%d %H:%M UTC")
    );
    println!();
    println!("  {}", style("── Build ──").dim());
    match session {
        Some(session) => {
            println!("    {} {}", style("Mode:").bold(), session.mode);
            println!(
                "    {} {} of {}",
                style("Stage:").bold(),
                stage_name(session.current_step),
                plan::STEP_PLAN.len()
            );
            if let Some(url) = session.artifacts.get("siteUrl").and_then(|u| u.as_str()) {
                println!("    {} {}", style("Site:").bold(), style(url).cyan());
            }
        }
        None => println!("    {}", style("not started").dim()),
    }
    println!();
    Ok(())
}

/// Resolve a project id argument, failing with a readable message.
pub async fn load_project(state: &AppState, id: &str) -> Result<Project> {
    let project_id: ProjectId = id
        .parse()
        .with_context(|| format!("'{id}' is not a valid project id"))?;
    state
        .projects
        .get_by_id(&project_id)
        .await?
        .with_context(|| format!("project {project_id} not found"))
}

pub(crate) fn stage_name(step: usize) -> String {
    match plan::step(step) {
        Some(definition) => format!("{}. {}", step + 1, definition.name),
        None => format!("{}", step + 1),
    }
}
