//! Launch a Starlink application and capture its output

use std::io::{ErrorKind, Read};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::args::Invocation;
use crate::decode::latin1;
use crate::environ::Environment;
use crate::error::StarError;

const POLL_INTERVAL: Duration = Duration::from_millis(25);
/// How long readers get to finish after a timed-out group is killed
const READER_GRACE: Duration = Duration::from_millis(500);
/// stdout and stderr
const STREAMS: usize = 2;

/// Captured result of a successful run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutput {
    /// Command after placeholder resolution
    pub command: String,
    pub args: Vec<String>,
    pub stdout: String,
    pub stderr: String,
}

/// Run an invocation with the given environment
///
/// The child gets exactly `env` (nothing inherited), one argv element per
/// argument and no shell. A non-zero exit is an error carrying both streams.
pub fn run(
    invocation: &Invocation,
    env: &Environment,
    timeout: Option<Duration>,
) -> Result<RunOutput, StarError> {
    let command = env.resolve_placeholders(invocation.command());
    if command.contains(std::path::MAIN_SEPARATOR) && !Path::new(&command).exists() {
        return Err(StarError::CommandNotFound { command });
    }

    let args = invocation.render_arguments();
    debug!(%command, ?args, "running");

    let mut cmd = Command::new(&command);
    cmd.args(&args)
        .env_clear()
        .envs(env.iter())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    // Own process group so a timeout can take down anything the command forks
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let mut child = cmd.spawn().map_err(|e| match e.kind() {
        ErrorKind::NotFound => StarError::CommandNotFound {
            command: command.clone(),
        },
        _ => StarError::Spawn {
            command: command.clone(),
            source: e,
        },
    })?;

    let deadline = timeout.map(|limit| Instant::now() + limit);
    let (done_tx, done_rx) = mpsc::channel();
    let stdout_capture = drain(child.stdout.take(), done_tx.clone());
    let stderr_capture = drain(child.stderr.take(), done_tx);

    let outcome = wait(&mut child, deadline)
        .and_then(|status| drained(&done_rx, deadline).map(|()| status));

    if let Err(Waited::TimedOut) = outcome {
        kill(&mut child);
        // Reap it; the status no longer matters
        let _ = child.wait();
        // Readers see end of file once the group is gone
        let _ = drained(&done_rx, Some(Instant::now() + READER_GRACE));
    }

    let stdout = stdout_capture.text();
    let stderr = stderr_capture.text();

    if !stderr.trim().is_empty() {
        info!(%command, "{}", stderr.trim_end());
    }
    if !stdout.trim().is_empty() {
        debug!(%command, "{}", stdout.trim_end());
    }

    let status = match outcome {
        Ok(status) => status,
        Err(Waited::TimedOut) => {
            return Err(StarError::TimedOut {
                command,
                timeout: timeout.unwrap_or_default(),
                stdout,
                stderr,
            })
        }
        Err(Waited::Failed(source)) => return Err(StarError::Spawn { command, source }),
    };

    if !status.success() {
        return Err(StarError::ExecutionFailed {
            command,
            args,
            status: describe(status),
            stdout,
            stderr,
        });
    }

    Ok(RunOutput {
        command,
        args,
        stdout,
        stderr,
    })
}

enum Waited {
    TimedOut,
    Failed(std::io::Error),
}

fn wait(child: &mut Child, deadline: Option<Instant>) -> Result<ExitStatus, Waited> {
    let Some(deadline) = deadline else {
        return child.wait().map_err(Waited::Failed);
    };

    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status),
            Ok(None) if Instant::now() >= deadline => return Err(Waited::TimedOut),
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(e) => return Err(Waited::Failed(e)),
        }
    }
}

/// Wait for both pipe readers to reach end of file
///
/// Anything the command left running in the background keeps the pipes
/// open, so this shares the deadline with [`wait`].
fn drained(done: &Receiver<()>, deadline: Option<Instant>) -> Result<(), Waited> {
    for _ in 0..STREAMS {
        match deadline {
            Some(deadline) => {
                match done.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => {}
                    Err(RecvTimeoutError::Timeout) => return Err(Waited::TimedOut),
                }
            }
            None => {
                let _ = done.recv();
            }
        }
    }
    Ok(())
}

#[cfg(unix)]
fn kill(child: &mut Child) {
    let pgid = child.id() as libc::pid_t;
    // SAFETY: signalling a process group we created; no memory is touched
    let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if rc != 0 {
        let _ = child.kill();
    }
}

#[cfg(not(unix))]
fn kill(child: &mut Child) {
    let _ = child.kill();
}

/// Bytes read from one stream so far
#[derive(Clone, Default)]
struct Capture(Arc<Mutex<Vec<u8>>>);

impl Capture {
    fn append(&self, bytes: &[u8]) {
        self.0
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend_from_slice(bytes);
    }

    /// Starlink writes ISO-8859-1, like the text in its containers
    fn text(&self) -> String {
        latin1(&self.0.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

fn drain<R: Read + Send + 'static>(stream: Option<R>, done: Sender<()>) -> Capture {
    let capture = Capture::default();
    let sink = capture.clone();

    thread::spawn(move || {
        if let Some(mut stream) = stream {
            let mut buf = [0u8; 8192];
            loop {
                match stream.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => sink.append(&buf[..n]),
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(_) => break,
                }
            }
        }
        let _ = done.send(());
    });

    capture
}

fn describe(status: ExitStatus) -> String {
    if let Some(code) = status.code() {
        return code.to_string();
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("killed by signal {}", signal);
        }
    }
    status.to_string()
}
