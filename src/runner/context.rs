//! Session context handed to the agent through `--append-system-prompt`.

use std::path::{Path, PathBuf};

use crate::config::TaskConfig;
use crate::session::SessionPaths;

/// Renders the per-invocation session context markdown.
pub struct ContextBuilder<'a> {
    session: &'a SessionPaths,
    task: &'a TaskConfig,
    branch_prefix: Option<&'a str>,
    working_dir: Option<PathBuf>,
    phase: Option<&'a str>,
    iteration: Option<u32>,
    initial_task: Option<&'a str>,
}

impl<'a> ContextBuilder<'a> {
    pub fn new(session: &'a SessionPaths, task: &'a TaskConfig) -> Self {
        Self {
            session,
            task,
            branch_prefix: None,
            working_dir: None,
            phase: None,
            iteration: None,
            initial_task: None,
        }
    }

    pub fn branch_prefix(mut self, prefix: Option<&'a str>) -> Self {
        self.branch_prefix = prefix.filter(|p| !p.is_empty());
        self
    }

    pub fn working_dir(mut self, dir: &Path) -> Self {
        self.working_dir = Some(dir.to_path_buf());
        self
    }

    pub fn phase(mut self, phase: &'a str) -> Self {
        self.phase = Some(phase);
        self
    }

    pub fn iteration(mut self, iteration: u32) -> Self {
        self.iteration = Some(iteration);
        self
    }

    /// Instructions for a brand new session. Ignored when blank.
    pub fn initial_task(mut self, task: Option<&'a str>) -> Self {
        self.initial_task = task.map(str::trim).filter(|t| !t.is_empty());
        self
    }

    pub fn worktree_path(&self) -> PathBuf {
        self.task.worktrees.join(&self.session.name)
    }

    pub fn branch_name(&self) -> String {
        let name = self.session.short_name();
        match self.branch_prefix {
            Some(prefix) => format!("{}/{}", prefix.trim_end_matches('/'), name),
            None => name.to_string(),
        }
    }

    pub fn build(&self) -> String {
        let mut lines = vec!["# Session Context".to_string()];
        lines.push(format!("**Session path:** {}", self.session.dir.display()));
        if let Some(dir) = &self.working_dir {
            lines.push(format!("**Working directory:** {}", dir.display()));
        }
        if let Some(phase) = self.phase {
            lines.push(format!("**Phase:** {}", phase));
        }
        if let Some(iteration) = self.iteration {
            lines.push(format!("**Iteration:** {}", iteration));
        }

        lines.push(String::new());
        lines.push("## Worktree Configuration".to_string());
        lines.push(format!("- Base repo: `{}`", self.task.main_repo.display()));
        lines.push(format!("- Worktree path: `{}`", self.worktree_path().display()));
        lines.push(format!("- Branch name: `{}`", self.branch_name()));

        if let Some(task) = self.initial_task {
            lines.push(String::new());
            lines.push("## Initial Instructions".to_string());
            lines.push("This is a NEW session. After initialization:".to_string());
            lines.push(format!("1. Define task: **{}**", task));
            lines.push(String::new());
            lines.push(
                "Continue through every workflow phase until the task is done; \
                 do not signal `done` before the done phase."
                    .to_string(),
            );
        }

        lines.join("\n")
    }
}
