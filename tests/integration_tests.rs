//! Integration tests for the shepherd binary.
//!
//! A shell script stands in for the agent: it reads the session path from
//! the environment and writes the overview and signal files itself.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn shepherd() -> Command {
    cargo_bin_cmd!("shepherd")
}

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("repo")).unwrap();
        fs::create_dir_all(dir.path().join("sessions")).unwrap();
        fs::write(
            dir.path().join(".shepherd"),
            format!(
                "# task paths\nMAIN_REPO={}\nWORKTREES={}\nSESSIONS={}\n",
                dir.path().join("repo").display(),
                dir.path().join("trees").display(),
                dir.path().join("sessions").display()
            ),
        )
        .unwrap();
        Self { dir }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn sessions(&self) -> PathBuf {
        self.path().join("sessions")
    }

    /// A session directory with an existing overview.
    fn session(&self, name: &str, overview: &str) -> PathBuf {
        let dir = self.sessions().join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("_overview.md"), overview).unwrap();
        dir
    }

    #[cfg(unix)]
    fn agent(&self, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = self.path().join("agent.sh");
        fs::write(&path, format!("#!/bin/sh\n{}", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn cmd(&self) -> Command {
        let mut cmd = shepherd();
        cmd.current_dir(self.path())
            .env_remove("TELEGRAM_BOT_TOKEN")
            .env_remove("TELEGRAM_CHAT_ID")
            .env("SHEPHERD_RETRY_DELAY", "0")
            .env("RUST_LOG", "warn");
        cmd
    }
}

/// Agent body that writes `signal` as the control signal.
fn writes_signal(signal: &str) -> String {
    format!(
        "printf '%s\\n' '{{\"type\":\"system\",\"subtype\":\"init\"}}'\nprintf '%s' '{}' > \"$SHEPHERD_SESSION_PATH/_signal.json\"\n",
        signal
    )
}

mod cli_basics {
    use super::*;

    #[test]
    fn test_help() {
        shepherd()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("run"))
            .stdout(predicate::str::contains("history"));
    }

    #[test]
    fn test_version() {
        shepherd().arg("--version").assert().success();
    }

    #[test]
    fn test_phases_lists_standard_table() {
        shepherd()
            .arg("phases")
            .assert()
            .success()
            .stdout(predicate::str::contains("requirements-agent"))
            .stdout(predicate::str::contains("quality, done"))
            .stdout(predicate::str::contains("(terminal)"))
            .stdout(predicate::str::contains("continue, waiting, blocked"))
            .stdout(predicate::str::contains("done, blocked"))
            .stdout(predicate::str::contains("New sessions start in 'init'"));
    }

    #[test]
    fn test_run_requires_session() {
        shepherd().arg("run").assert().failure();
    }
}

mod configuration {
    use super::*;

    #[test]
    fn test_missing_task_file_fails() {
        let ws = Workspace::new();
        ws.cmd()
            .args(["run", "--config", "absent.cfg", "--session", "x"])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("Failed to read task config"));
    }

    #[test]
    fn test_missing_main_repo_fails_before_any_iteration() {
        let ws = Workspace::new();
        fs::write(ws.path().join("partial.cfg"), "WORKTREES=/w\nSESSIONS=/s\n").unwrap();
        ws.cmd()
            .args(["run", "--config", "partial.cfg", "--session", "x"])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("MAIN_REPO is required"));
        assert!(!Path::new("/s").join("x").exists());
    }

    #[test]
    fn test_invalid_environment_fails() {
        let ws = Workspace::new();
        ws.cmd()
            .env("SHEPHERD_BACKOFF", "linear")
            .args(["run", "--session", "x"])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("SHEPHERD_BACKOFF"));
    }
}

#[cfg(unix)]
mod run {
    use super::*;

    #[test]
    fn test_done_exits_zero_and_records_history() {
        let ws = Workspace::new();
        let session = ws.session("add-auth", "# Session\nPhase: done\nIteration: 9\n");
        let agent = ws.agent(&writes_signal(
            r#"{"status":"done","phase":"done","summary":"shipped"}"#,
        ));

        ws.cmd()
            .env("SHEPHERD_AGENT_CMD", &agent)
            .args(["run", "--session", "add-auth"])
            .assert()
            .code(0)
            .stdout(predicate::str::contains("DONE"));

        let history = fs::read_to_string(session.join("_signal_history.jsonl")).unwrap();
        assert_eq!(history.lines().count(), 1);
        assert!(history.contains("\"verdict\":\"accepted\""));
        assert!(session.join("session.log").exists());

        let logs: Vec<_> = fs::read_dir(&session)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n.ends_with("-done-a1.jsonl"))
            .collect();
        assert_eq!(logs.len(), 1);
        let output = fs::read_to_string(session.join(&logs[0])).unwrap();
        assert!(output.contains("\"subtype\":\"init\""));

        let overview = fs::read_to_string(session.join("_overview.md")).unwrap();
        assert!(overview.contains("[shepherd] done in done: shipped"));
    }

    #[test]
    fn test_gate_waiting_exits_three() {
        let ws = Workspace::new();
        ws.session("add-auth", "Phase: requirements\n");
        let agent = ws.agent(&writes_signal(
            r#"{"status":"waiting","phase":"requirements","for":"qa_answers"}"#,
        ));

        ws.cmd()
            .env("SHEPHERD_AGENT_CMD", &agent)
            .args(["run", "--session", "add-auth"])
            .assert()
            .code(3)
            .stdout(predicate::str::contains("WAITING"))
            .stdout(predicate::str::contains("qa_answers"));
    }

    #[test]
    fn test_new_session_is_dated_and_starts_in_init() {
        let ws = Workspace::new();
        let agent = ws.agent(&format!(
            "printf 'Phase: init\\n' > \"$SHEPHERD_SESSION_PATH/_overview.md\"\n{}",
            writes_signal(
                r#"{"status":"blocked","phase":"init","reason":"need repo access","needs":"clarification"}"#
            )
        ));

        ws.cmd()
            .env("SHEPHERD_AGENT_CMD", &agent)
            .args(["run", "--session", "New Task", "--task", "Add OAuth login"])
            .assert()
            .code(2)
            .stdout(predicate::str::contains("blocked in init: need repo access"));

        let created: Vec<_> = fs::read_dir(ws.sessions())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(created.len(), 1);
        assert!(created[0].ends_with("-new-task"), "{:?}", created);
    }

    #[test]
    fn test_failing_agent_blocks_after_retries() {
        let ws = Workspace::new();
        let session = ws.session("flaky", "Phase: testing\n");
        let agent = ws.agent("echo 'rate limited' >&2\nexit 1\n");

        ws.cmd()
            .env("SHEPHERD_AGENT_CMD", &agent)
            .env("SHEPHERD_MAX_RETRIES", "2")
            .args(["run", "--session", "flaky"])
            .assert()
            .code(2)
            .stdout(predicate::str::contains("process failed 2 times"))
            .stdout(predicate::str::contains("rate limited"));

        let attempts = fs::read_dir(&session)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains("-testing-a"))
            .count();
        assert_eq!(attempts, 2);
    }

    #[test]
    fn test_timeout_flag_kills_agent() {
        let ws = Workspace::new();
        ws.session("slow", "Phase: testing\n");
        let agent = ws.agent("exec sleep 30\n");

        ws.cmd()
            .env("SHEPHERD_AGENT_CMD", &agent)
            .env("SHEPHERD_MAX_RETRIES", "1")
            .args(["run", "--session", "slow", "--timeout", "1"])
            .timeout(std::time::Duration::from_secs(20))
            .assert()
            .code(2)
            .stdout(predicate::str::contains("timed out after 1s"));
    }

    #[test]
    fn test_illegal_transition_blocks() {
        let ws = Workspace::new();
        ws.session("jumpy", "Phase: init\n");
        let agent = ws.agent(&writes_signal(r#"{"status":"continue","phase":"testing"}"#));

        ws.cmd()
            .env("SHEPHERD_AGENT_CMD", &agent)
            .args(["run", "--session", "jumpy"])
            .assert()
            .code(2)
            .stdout(predicate::str::contains("illegal phase transition"));
    }

    #[test]
    fn test_max_iterations_caps_run() {
        let ws = Workspace::new();
        ws.session("loop", "Phase: implementation\n");
        let agent = ws.agent(&writes_signal(
            r#"{"status":"continue","phase":"implementation"}"#,
        ));

        ws.cmd()
            .env("SHEPHERD_AGENT_CMD", &agent)
            .args(["run", "--session", "loop", "--max-iterations", "2"])
            .assert()
            .code(2)
            .stdout(predicate::str::contains("iteration cap of 2 reached"))
            .stdout(predicate::str::contains("(2 iterations)"));
    }
}

#[cfg(unix)]
mod inspection {
    use super::*;

    #[test]
    fn test_status_and_history_after_run() {
        let ws = Workspace::new();
        ws.session(
            "26-01-15-add-auth",
            "Phase: done\nIteration: 4\nLast Action: wrote release notes\n",
        );
        let agent = ws.agent(&writes_signal(
            r#"{"status":"done","phase":"done","summary":"shipped"}"#,
        ));
        ws.cmd()
            .env("SHEPHERD_AGENT_CMD", &agent)
            .args(["run", "--session", "add-auth"])
            .assert()
            .code(0);

        ws.cmd()
            .args(["status", "--session", "add-auth"])
            .assert()
            .success()
            .stdout(predicate::str::contains("26-01-15-add-auth"))
            .stdout(predicate::str::contains("Iteration: 4"))
            .stdout(predicate::str::contains("wrote release notes"))
            .stdout(predicate::str::contains("accepted"));

        ws.cmd()
            .args(["history", "--session", "add-auth"])
            .assert()
            .success()
            .stdout(predicate::str::contains("done"))
            .stdout(predicate::str::contains("accepted"));
    }

    #[test]
    fn test_status_unknown_session_fails() {
        let ws = Workspace::new();
        ws.cmd()
            .args(["status", "--session", "nothing"])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("No session matching 'nothing'"));
    }

    #[test]
    fn test_history_empty_session() {
        let ws = Workspace::new();
        ws.session("quiet", "Phase: init\n");
        ws.cmd()
            .args(["history", "--session", "quiet"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No signals recorded"));
    }
}
