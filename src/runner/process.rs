use async_trait::async_trait;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdout, Command};

use super::{AgentRunner, InvocationContext, ProcessResult};
use crate::config::RuntimeConfig;
use crate::errors::RunnerError;
use crate::stream::{Progress, decode_line};

/// Characters of stderr kept for error reports.
const STDERR_TAIL_CHARS: usize = 500;

/// Runs the agent CLI as a child process.
pub struct ProcessRunner {
    agent_cmd: String,
    flags: Vec<String>,
}

impl ProcessRunner {
    pub fn new(config: &RuntimeConfig) -> Self {
        Self {
            agent_cmd: config.agent_cmd.clone(),
            flags: config.agent_flags(),
        }
    }

    fn args(&self, ctx: &InvocationContext) -> Vec<String> {
        let mut args = self.flags.clone();
        args.push("--agent".to_string());
        args.push(ctx.agent.clone());
        args.push("--append-system-prompt".to_string());
        args.push(ctx.payload.clone());
        args
    }

    fn command(&self, ctx: &InvocationContext) -> Command {
        let mut cmd = Command::new(&self.agent_cmd);
        cmd.args(self.args(ctx))
            .current_dir(&ctx.working_dir)
            .env("SHEPHERD_SESSION_PATH", &ctx.session_path)
            .env("SHEPHERD_PHASE", &ctx.phase)
            .env("SHEPHERD_ITERATION", ctx.session_iteration.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

/// Copy stdout to the log file line by line, flushing after each line so
/// output survives a kill. Bytes are logged as the agent wrote them; only the
/// progress decoding is lossy.
async fn pump_output(
    stdout: ChildStdout,
    log: &mut tokio::fs::File,
    phase: &str,
) -> std::io::Result<u64> {
    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();
    let mut count = 0u64;

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        if buf.last() != Some(&b'\n') {
            buf.push(b'\n');
        }
        log.write_all(&buf).await?;
        log.flush().await?;
        count += 1;

        let line = String::from_utf8_lossy(&buf[..buf.len() - 1]);
        match decode_line(&line) {
            Some(Progress::Activity(items)) => {
                for item in items {
                    tracing::debug!(phase, "{}", item);
                }
            }
            Some(Progress::Finished {
                is_error,
                turns,
                summary,
            }) => {
                tracing::info!(phase, is_error, ?turns, summary = ?summary, "Agent finished");
            }
            None => {}
        }
    }

    Ok(count)
}

fn tail(s: &str, max_chars: usize) -> String {
    let total = s.chars().count();
    s.chars().skip(total.saturating_sub(max_chars)).collect()
}

#[async_trait]
impl AgentRunner for ProcessRunner {
    async fn invoke(
        &self,
        ctx: &InvocationContext,
        timeout: Duration,
    ) -> Result<ProcessResult, RunnerError> {
        let mut log = tokio::fs::File::create(&ctx.log_file).await?;

        tracing::info!(
            agent = %ctx.agent,
            phase = %ctx.phase,
            attempt = ctx.attempt,
            log_file = %ctx.log_file.display(),
            "Spawning agent"
        );

        let start = Instant::now();
        let mut child = self
            .command(ctx)
            .spawn()
            .map_err(|source| RunnerError::Spawn {
                command: self.agent_cmd.clone(),
                source,
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("agent stdout was not captured"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| std::io::Error::other("agent stderr was not captured"))?;

        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stderr.read_to_end(&mut buf).await;
            String::from_utf8_lossy(&buf).into_owned()
        });

        let outcome = tokio::time::timeout(timeout, async {
            let lines = pump_output(stdout, &mut log, &ctx.phase).await?;
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((status, lines))
        })
        .await;

        let (status, output_lines) = match outcome {
            Ok(result) => result?,
            Err(_) => {
                if let Err(e) = child.kill().await {
                    tracing::warn!(error = %e, "Failed to kill timed out agent");
                }
                stderr_task.abort();
                tracing::error!(timeout_secs = timeout.as_secs(), "Agent timed out");
                return Err(RunnerError::Timeout { timeout });
            }
        };

        let stderr = stderr_task.await.unwrap_or_default();
        let duration = start.elapsed();

        if !status.success() {
            tracing::error!(code = ?status.code(), "Agent exited with failure");
            return Err(RunnerError::NonZeroExit {
                code: status.code(),
                stderr: tail(&stderr, STDERR_TAIL_CHARS),
            });
        }

        tracing::info!(
            duration_secs = duration.as_secs_f64(),
            output_lines,
            "Agent completed"
        );

        Ok(ProcessResult {
            exit_code: status.code(),
            duration,
            output_lines,
            log_file: ctx.log_file.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::TempDir;

    fn context(dir: &Path) -> InvocationContext {
        InvocationContext {
            session_path: dir.to_path_buf(),
            working_dir: dir.to_path_buf(),
            phase: "testing".into(),
            agent: "testing-agent".into(),
            payload: "# Session Context".into(),
            iteration_token: 1,
            attempt: 1,
            session_iteration: 7,
            log_file: dir.join("01-15-143005-testing-a1.jsonl"),
        }
    }

    fn runner_for(cmd: &str) -> ProcessRunner {
        ProcessRunner {
            agent_cmd: cmd.to_string(),
            flags: vec![],
        }
    }

    #[cfg(unix)]
    fn write_script(dir: &TempDir, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.path().join("agent.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{}", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn test_args_include_agent_and_payload() {
        let runner = ProcessRunner::new(&RuntimeConfig::default());
        let dir = tempfile::tempdir().unwrap();
        let args = runner.args(&context(dir.path()));
        assert_eq!(args[0], "--dangerously-skip-permissions");
        let n = args.len();
        assert_eq!(
            &args[n - 4..],
            &["--agent", "testing-agent", "--append-system-prompt", "# Session Context"]
        );
    }

    #[test]
    fn test_tail_keeps_last_chars() {
        assert_eq!(tail("abcdef", 3), "def");
        assert_eq!(tail("ab", 3), "ab");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_invoke_streams_output_and_sets_env() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(
            &dir,
            "echo \"{\\\"type\\\":\\\"system\\\",\\\"subtype\\\":\\\"init\\\"}\"\necho \"$SHEPHERD_PHASE $SHEPHERD_ITERATION\"\necho \"$SHEPHERD_SESSION_PATH\"\n",
        );
        let ctx = context(dir.path());

        let result = runner_for(&script)
            .invoke(&ctx, Duration::from_secs(10))
            .await
            .unwrap();

        assert_eq!(result.exit_code, Some(0));
        assert_eq!(result.output_lines, 3);
        let log = std::fs::read_to_string(&ctx.log_file).unwrap();
        let lines: Vec<&str> = log.lines().collect();
        assert_eq!(lines[0], r#"{"type":"system","subtype":"init"}"#);
        assert_eq!(lines[1], "testing 7");
        assert_eq!(lines[2], dir.path().to_string_lossy());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_invoke_non_zero_exit_keeps_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(&dir, "echo 'rate limited' >&2\nexit 3\n");

        let err = runner_for(&script)
            .invoke(&context(dir.path()), Duration::from_secs(10))
            .await
            .unwrap_err();

        match err {
            RunnerError::NonZeroExit { code, stderr } => {
                assert_eq!(code, Some(3));
                assert!(stderr.contains("rate limited"));
            }
            other => panic!("Expected NonZeroExit, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_invoke_timeout_kills_and_keeps_partial_output() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(&dir, "echo started\nexec sleep 30\n");
        let ctx = context(dir.path());

        let start = Instant::now();
        let err = runner_for(&script)
            .invoke(&ctx, Duration::from_millis(500))
            .await
            .unwrap_err();

        assert!(matches!(err, RunnerError::Timeout { .. }));
        assert!(start.elapsed() < Duration::from_secs(10));
        let log = std::fs::read_to_string(&ctx.log_file).unwrap();
        assert_eq!(log, "started\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_invoke_survives_non_utf8_output() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(&dir, "printf 'ok\\n\\377\\n'\necho after\nexit 0\n");
        let ctx = context(dir.path());

        let result = runner_for(&script)
            .invoke(&ctx, Duration::from_secs(10))
            .await
            .unwrap();

        assert_eq!(result.output_lines, 3);
        let log = std::fs::read(&ctx.log_file).unwrap();
        assert_eq!(log, b"ok\n\xff\nafter\n");
    }

    #[tokio::test]
    async fn test_invoke_spawn_failure() {
        let dir = tempfile::tempdir().unwrap();
        let err = runner_for("/nonexistent/agent-binary")
            .invoke(&context(dir.path()), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::Spawn { .. }));
    }
}
