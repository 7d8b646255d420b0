//! Agent subprocess supervision.
//!
//! Spawns the black-box agent program with piped stdio in a caller-supplied
//! workdir, streams its output line by line into a bounded capture, and
//! terminates it with graceful-then-forced escalation. The supervisor only
//! observes processes; it never interprets their output.

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::collections::{HashMap, VecDeque};
use std::process::Stdio;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::domain::errors::{OrchestrationError, OrchestrationResult};

/// Which stream a captured line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// One captured output line.
#[derive(Debug, Clone)]
pub struct OutputLine {
    pub agent_id: String,
    pub stream: OutputStream,
    pub line: String,
}

/// How to launch one agent process.
#[derive(Debug, Clone)]
pub struct AgentCommand {
    pub program: String,
    pub args: Vec<String>,
    pub workdir: std::path::PathBuf,
    /// Written to the child's stdin, which is then closed.
    pub prompt: String,
    /// Environment extension on top of the inherited environment.
    pub env: HashMap<String, String>,
}

struct ProcessHandle {
    pid: i32,
    exit_rx: watch::Receiver<Option<i32>>,
    killed: bool,
    lines: Arc<StdMutex<VecDeque<OutputLine>>>,
}

impl ProcessHandle {
    fn exit_code(&self) -> Option<i32> {
        *self.exit_rx.borrow()
    }

    fn running(&self) -> bool {
        self.exit_code().is_none() && !self.killed
    }
}

/// Supervises the agentId → process map.
pub struct ProcessSupervisor {
    processes: StdMutex<HashMap<String, ProcessHandle>>,
    /// Cap on retained output lines per process.
    capture_limit: usize,
}

impl ProcessSupervisor {
    pub fn new(capture_limit: usize) -> Self {
        Self {
            processes: StdMutex::new(HashMap::new()),
            capture_limit: capture_limit.max(1),
        }
    }

    /// Spawn an agent process. Any previous handle for the id is replaced;
    /// callers terminate before respawning.
    pub async fn spawn(
        &self,
        agent_id: &str,
        command: AgentCommand,
        line_tx: Option<mpsc::UnboundedSender<OutputLine>>,
    ) -> OrchestrationResult<()> {
        let spawn_err = |message: String| OrchestrationError::AgentSpawn {
            agent_id: Some(agent_id.to_string()),
            task_id: None,
            message,
        };

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .current_dir(&command.workdir)
            .envs(&command.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| spawn_err(format!("{}: {e}", command.program)))?;

        let pid = child
            .id()
            .ok_or_else(|| spawn_err("child exited before pid was read".into()))?
            as i32;

        // Hand the prompt over on stdin, then close it so the child sees EOF.
        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(command.prompt.as_bytes()).await {
                warn!(agent_id, error = %e, "failed to write prompt to agent stdin");
            }
            drop(stdin);
        }

        let lines = Arc::new(StdMutex::new(VecDeque::new()));
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(read_stream(
                agent_id.to_string(),
                OutputStream::Stdout,
                stdout,
                lines.clone(),
                self.capture_limit,
                line_tx.clone(),
            ));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(read_stream(
                agent_id.to_string(),
                OutputStream::Stderr,
                stderr,
                lines.clone(),
                self.capture_limit,
                line_tx,
            ));
        }

        let (exit_tx, exit_rx) = watch::channel(None);
        {
            let agent_id = agent_id.to_string();
            tokio::spawn(async move {
                let code = match child.wait().await {
                    Ok(status) => status.code().unwrap_or(-1),
                    Err(e) => {
                        warn!(agent_id = %agent_id, error = %e, "wait on agent process failed");
                        -1
                    }
                };
                debug!(agent_id = %agent_id, code, "agent process exited");
                let _ = exit_tx.send(Some(code));
            });
        }

        info!(agent_id, pid, program = %command.program, "agent process spawned");
        self.processes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(
                agent_id.to_string(),
                ProcessHandle {
                    pid,
                    exit_rx,
                    killed: false,
                    lines,
                },
            );
        Ok(())
    }

    /// `exit_code == None && !killed`.
    pub fn is_running(&self, agent_id: &str) -> bool {
        self.processes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(agent_id)
            .map(ProcessHandle::running)
            .unwrap_or(false)
    }

    pub fn exit_code(&self, agent_id: &str) -> Option<i32> {
        self.processes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(agent_id)
            .and_then(ProcessHandle::exit_code)
    }

    /// Snapshot of the captured output for an agent.
    pub fn captured_output(&self, agent_id: &str) -> Vec<OutputLine> {
        self.processes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(agent_id)
            .map(|h| h.lines.lock().unwrap_or_else(|e| e.into_inner()).iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Two-phase termination: SIGTERM, bounded wait, then SIGKILL.
    pub async fn terminate(&self, agent_id: &str, grace: Duration) -> OrchestrationResult<()> {
        let (pid, mut exit_rx) = {
            let mut processes = self.processes.lock().unwrap_or_else(|e| e.into_inner());
            let Some(handle) = processes.get_mut(agent_id) else {
                return Ok(());
            };
            if !handle.running() {
                return Ok(());
            }
            handle.killed = true;
            (handle.pid, handle.exit_rx.clone())
        };

        debug!(agent_id, pid, "sending SIGTERM to agent process");
        let _ = kill(Pid::from_raw(pid), Signal::SIGTERM);

        let exited = timeout(grace, async {
            loop {
                if exit_rx.borrow().is_some() {
                    return;
                }
                if exit_rx.changed().await.is_err() {
                    return;
                }
            }
        })
        .await
        .is_ok();

        if !exited {
            warn!(agent_id, pid, "graceful termination expired, sending SIGKILL");
            let _ = kill(Pid::from_raw(pid), Signal::SIGKILL);
            let _ = timeout(Duration::from_secs(5), async {
                loop {
                    if exit_rx.borrow().is_some() {
                        return;
                    }
                    if exit_rx.changed().await.is_err() {
                        return;
                    }
                }
            })
            .await;
        }
        Ok(())
    }

    /// Terminate every supervised process.
    pub async fn terminate_all(&self, grace: Duration) {
        let ids: Vec<String> = self
            .processes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        for id in ids {
            if let Err(e) = self.terminate(&id, grace).await {
                warn!(agent_id = %id, error = %e, "terminate failed");
            }
        }
    }

    /// Drop bookkeeping for an agent whose process has already ended.
    pub fn forget(&self, agent_id: &str) {
        self.processes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(agent_id);
    }
}

async fn read_stream<R>(
    agent_id: String,
    stream: OutputStream,
    reader: R,
    lines: Arc<StdMutex<VecDeque<OutputLine>>>,
    cap: usize,
    line_tx: Option<mpsc::UnboundedSender<OutputLine>>,
) where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader).lines();
    while let Ok(Some(text)) = reader.next_line().await {
        debug!(agent_id = %agent_id, stream = ?stream, line = %text, "agent output");
        let line = OutputLine {
            agent_id: agent_id.clone(),
            stream,
            line: text,
        };
        {
            let mut buffer = lines.lock().unwrap_or_else(|e| e.into_inner());
            buffer.push_back(line.clone());
            while buffer.len() > cap {
                buffer.pop_front();
            }
        }
        if let Some(tx) = &line_tx {
            let _ = tx.send(line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn command(dir: &TempDir, program: &str, args: &[&str]) -> AgentCommand {
        AgentCommand {
            program: program.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            workdir: dir.path().to_path_buf(),
            prompt: String::new(),
            env: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_spawn_captures_output_and_exit() {
        let dir = TempDir::new().unwrap();
        let supervisor = ProcessSupervisor::new(100);

        supervisor
            .spawn(
                "a1",
                command(&dir, "sh", &["-c", "echo one; echo two 1>&2"]),
                None,
            )
            .await
            .unwrap();

        // Give the short-lived process time to finish.
        for _ in 0..50 {
            if !supervisor.is_running("a1") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!supervisor.is_running("a1"));
        assert_eq!(supervisor.exit_code("a1"), Some(0));

        let output = supervisor.captured_output("a1");
        let stdout: Vec<&str> = output
            .iter()
            .filter(|l| l.stream == OutputStream::Stdout)
            .map(|l| l.line.as_str())
            .collect();
        assert_eq!(stdout, vec!["one"]);
        assert!(output.iter().any(|l| l.stream == OutputStream::Stderr));
    }

    #[tokio::test]
    async fn test_capture_is_bounded() {
        let dir = TempDir::new().unwrap();
        let supervisor = ProcessSupervisor::new(5);

        supervisor
            .spawn(
                "a1",
                command(&dir, "sh", &["-c", "for i in $(seq 1 20); do echo line$i; done"]),
                None,
            )
            .await
            .unwrap();

        for _ in 0..50 {
            if !supervisor.is_running("a1") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        let output = supervisor.captured_output("a1");
        assert_eq!(output.len(), 5);
        assert_eq!(output.last().unwrap().line, "line20");
    }

    #[tokio::test]
    async fn test_terminate_escalation() {
        let dir = TempDir::new().unwrap();
        let supervisor = ProcessSupervisor::new(10);

        // Ignores SIGTERM, so termination must escalate to SIGKILL.
        supervisor
            .spawn(
                "stubborn",
                command(&dir, "sh", &["-c", "trap '' TERM; sleep 60"]),
                None,
            )
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(supervisor.is_running("stubborn"));

        supervisor
            .terminate("stubborn", Duration::from_millis(200))
            .await
            .unwrap();
        assert!(!supervisor.is_running("stubborn"));
    }

    #[tokio::test]
    async fn test_prompt_reaches_stdin() {
        let dir = TempDir::new().unwrap();
        let supervisor = ProcessSupervisor::new(10);

        let mut cmd = command(&dir, "cat", &[]);
        cmd.prompt = "hello agent".to_string();
        supervisor.spawn("echoer", cmd, None).await.unwrap();

        for _ in 0..50 {
            if !supervisor.is_running("echoer") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        let output = supervisor.captured_output("echoer");
        assert_eq!(output[0].line, "hello agent");
    }

    #[tokio::test]
    async fn test_spawn_failure_is_typed() {
        let dir = TempDir::new().unwrap();
        let supervisor = ProcessSupervisor::new(10);
        let err = supervisor
            .spawn("ghost", command(&dir, "definitely-not-a-real-binary", &[]), None)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::AgentSpawn { .. }));
    }
}
