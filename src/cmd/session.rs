//! `shepherd status` and `shepherd history`.

use anyhow::{Context, Result};
use chrono::Local;

use shepherd::config::TaskConfig;
use shepherd::history::{SignalHistory, Verdict};
use shepherd::phase::PhaseRegistry;
use shepherd::session::{self, SessionPaths};
use shepherd::signals::SignalStore;
use shepherd::state::{SessionDocument, StateSource};

use super::super::SessionArgs;

fn existing_session(target: &SessionArgs) -> Result<SessionPaths> {
    let task = TaskConfig::load(&target.config)?;
    let paths = session::resolve(&task.sessions, &target.session, Local::now())?;
    if !paths.exists() {
        anyhow::bail!(
            "No session matching '{}' under {}",
            target.session,
            task.sessions.display()
        );
    }
    Ok(paths)
}

pub fn cmd_status(target: &SessionArgs) -> Result<()> {
    let paths = existing_session(target)?;
    let registry = PhaseRegistry::standard();
    let document = SessionDocument::new(&paths.dir);

    println!();
    println!("Session: {}", console::style(&paths.name).bold());
    println!("Path:    {}", paths.dir.display());

    match document.load(&registry.initial().name, &registry.names())? {
        Ok((state, source)) => {
            let note = match source {
                StateSource::Fresh => " (no overview yet)".to_string(),
                StateSource::Recovered(err) => format!(" (recovered from log: {})", err),
                StateSource::Parsed => String::new(),
            };
            let gate = if registry.is_gate(&state.phase) {
                " [gate]"
            } else {
                ""
            };
            let phase = if registry.contains(&state.phase) {
                console::style(state.phase.clone()).cyan()
            } else {
                console::style(format!("{} (unregistered)", state.phase)).red()
            };
            println!("Phase:   {}{}{}", phase, gate, note);
            println!("Iteration: {}", state.iteration);
            if state.halted {
                println!("Halted:  {}", console::style("yes").yellow());
            }
            if let Some(dir) = &state.working_dir {
                println!("Working dir: {}", dir.display());
            }
            if let Some(action) = &state.last_action {
                println!("Last action: {}", action);
            }
            if let Some(next) = &state.next {
                println!("Next: {}", next);
            }
        }
        Err(err) => {
            println!("Phase:   {}", console::style(format!("state corrupted ({})", err)).red());
        }
    }

    let pending = SignalStore::new(&paths.dir);
    if pending.path().exists() {
        println!(
            "Pending signal: {}",
            std::fs::read_to_string(pending.path())
                .with_context(|| format!("Failed to read {}", pending.path().display()))?
                .trim()
        );
    }

    let history = SignalHistory::new(&paths.dir)
        .read_all()
        .context("Failed to read signal history")?;
    if let Some(last) = history.last() {
        println!(
            "Last signal: {} ({}) at {}",
            last.signal,
            last.verdict,
            last.timestamp.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
        );
    }
    println!();

    Ok(())
}

pub fn cmd_history(target: &SessionArgs, limit: Option<usize>) -> Result<()> {
    let paths = existing_session(target)?;
    let records = SignalHistory::new(&paths.dir)
        .read_all()
        .context("Failed to read signal history")?;

    if records.is_empty() {
        println!("No signals recorded for {}", paths.name);
        return Ok(());
    }

    let skip = limit.map(|n| records.len().saturating_sub(n)).unwrap_or(0);

    println!();
    println!(
        "{:<20} {:<6} {:<8} {:<16} {:<10} {:<20} Detail",
        "Time", "Iter", "Attempt", "Phase", "Status", "Verdict"
    );
    for record in records.iter().skip(skip) {
        let status = record
            .signal
            .get("status")
            .and_then(|s| s.as_str())
            .unwrap_or("-");
        let verdict = match record.verdict {
            Verdict::Accepted => console::style(record.verdict.to_string()).green(),
            Verdict::Invalid => console::style(record.verdict.to_string()).yellow(),
            Verdict::IllegalTransition => console::style(record.verdict.to_string()).red(),
        };
        println!(
            "{:<20} {:<6} {:<8} {:<16} {:<10} {:<20} {}",
            record
                .timestamp
                .with_timezone(&Local)
                .format("%Y-%m-%d %H:%M:%S"),
            record.iteration,
            record.attempt,
            record.phase,
            status,
            verdict,
            record.detail.as_deref().unwrap_or("")
        );
    }
    println!();

    Ok(())
}
