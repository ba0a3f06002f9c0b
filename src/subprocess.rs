// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::Ordering;
use std::thread;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::error::AstrometryError;
use crate::solver_trait::{ExternalSolver, Invocation, OutputSink};

// How often a running child is checked for exit, timeout and cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

const SPAWN_ATTEMPTS: u32 = 5;

/// Runs commands as child processes of this one.
#[derive(Clone, Debug, Default)]
pub struct Subprocess {}

impl Subprocess {
    pub fn new() -> Self {
        Subprocess{}
    }

    fn make_stdio(sink: &OutputSink) -> Result<Stdio, AstrometryError> {
        Ok(match sink {
            OutputSink::Inherit => Stdio::inherit(),
            OutputSink::Null => Stdio::null(),
            OutputSink::Log => Stdio::piped(),
            OutputSink::File(path) => {
                let file = File::options().create(true).append(true).open(path)
                    .map_err(|e| AstrometryError::io(
                        format!("Error opening output file {:?}", path), e))?;
                Stdio::from(file)
            },
        })
    }

    fn make_child(invocation: &Invocation) -> Result<Child, AstrometryError> {
        let mut command = Command::new(invocation.program);
        command.args(invocation.args)
            .stdin(Stdio::null())
            .stdout(Self::make_stdio(invocation.stdout)?)
            .stderr(Self::make_stdio(invocation.stderr)?);
        // solve-field runs helper programs of its own; put them all in one
        // process group so a kill reaches them too.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        let mut attempt = 1;
        loop {
            match command.spawn() {
                Err(e) if attempt < SPAWN_ATTEMPTS && Self::is_text_busy(&e) => {
                    // The executable was just written, and another thread's
                    // fork still holds it open.
                    debug!("{:?} busy, retrying", invocation.program);
                    thread::sleep(POLL_INTERVAL);
                    attempt += 1;
                },
                Err(e) => {
                    return Err(AstrometryError::io(
                        format!("Error launching {:?}", invocation.program), e));
                },
                Ok(child) => {
                    debug!("{:?} started with pid {}", invocation.program, child.id());
                    return Ok(child);
                }
            }
        }
    }

    #[cfg(unix)]
    fn is_text_busy(e: &std::io::Error) -> bool {
        e.raw_os_error() == Some(nix::errno::Errno::ETXTBSY as i32)
    }
    #[cfg(not(unix))]
    fn is_text_busy(_e: &std::io::Error) -> bool {
        false
    }

    fn make_log_worker<R: Read + Send + 'static>(
        stream: R, program: String, is_stderr: bool) -> JoinHandle<()> {
        thread::spawn(move || {
            let mut reader = BufReader::new(stream);
            loop {
                // Not read_line(): output that isn't UTF-8 must still be
                // drained, or the child blocks on a full pipe.
                let mut line = Vec::new();
                match reader.read_until(b'\n', &mut line) {
                    Ok(0) => break,  // Reached EOF.
                    Ok(_) => {
                        let line = String::from_utf8_lossy(&line);
                        let line = line.trim_end();
                        if is_stderr {
                            warn!("{}: {}", program, line);
                        } else {
                            info!("{}: {}", program, line);
                        }
                    },
                    Err(e) => {
                        warn!("Error reading output of {}: {:?}", program, e);
                        break;
                    }
                }
            }
        })
    }

    // Kills whatever is left of the child's process group.
    #[cfg(unix)]
    fn kill_group(child: &Child) {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;
        match killpg(Pid::from_raw(child.id() as i32), Signal::SIGKILL) {
            Ok(()) => debug!("Killed process group {}", child.id()),
            // The whole group has already exited.
            Err(nix::errno::Errno::ESRCH) => {},
            Err(e) => debug!("killpg for pid {} failed: {:?}", child.id(), e),
        }
    }
    #[cfg(not(unix))]
    fn kill_group(_child: &Child) {}

    // Kills the child (and its process group) and reaps it.
    fn terminate(child: &mut Child) {
        Self::kill_group(child);
        if let Err(e) = child.kill() {
            debug!("kill for pid {} failed: {:?}", child.id(), e);
        }
        if let Err(e) = child.wait() {
            warn!("Error reaping pid {}: {:?}", child.id(), e);
        }
    }

    fn wait(child: &mut Child, invocation: &Invocation)
            -> Result<Option<i32>, AstrometryError> {
        let command = invocation.program.display().to_string();
        if invocation.timeout.is_none() && invocation.cancel.is_none() {
            return match child.wait() {
                Ok(status) => Ok(status.code()),
                Err(e) => {
                    Self::terminate(child);
                    Err(AstrometryError::io(
                        format!("Error waiting for {}", command), e))
                }
            };
        }
        let start = Instant::now();
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    return Ok(status.code());
                },
                Ok(None) => {},
                Err(e) => {
                    Self::terminate(child);
                    return Err(AstrometryError::io(
                        format!("Error waiting for {}", command), e));
                }
            }
            if let Some(timeout) = invocation.timeout {
                if start.elapsed() >= timeout {
                    warn!("{} still running after {:?}; killing it", command, timeout);
                    Self::terminate(child);
                    return Err(AstrometryError::Timeout{command, timeout});
                }
            }
            if let Some(cancel) = invocation.cancel {
                if cancel.load(Ordering::Relaxed) {
                    info!("{} cancelled; killing it", command);
                    Self::terminate(child);
                    return Err(AstrometryError::Cancelled{command});
                }
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

impl ExternalSolver for Subprocess {
    fn run(&self, invocation: &Invocation) -> Result<Option<i32>, AstrometryError> {
        let mut child = Self::make_child(invocation)?;
        let program = invocation.program.display().to_string();
        let mut workers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            workers.push(Self::make_log_worker(stdout, program.clone(), false));
        }
        if let Some(stderr) = child.stderr.take() {
            workers.push(Self::make_log_worker(stderr, program.clone(), true));
        }
        let result = Self::wait(&mut child, invocation);
        // Helper processes that outlive the child would hold its output
        // pipes open. The workers see EOF once the group is gone.
        Self::kill_group(&child);
        for worker in workers {
            if worker.join().is_err() {
                warn!("Output worker for {} panicked", program);
            }
        }
        match &result {
            Ok(code) => debug!("{} exited with {:?}", program, code),
            Err(e) => debug!("{} failed: {}", program, e),
        }
        result
    }
}
