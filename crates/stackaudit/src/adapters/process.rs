// SPDX-License-Identifier: Apache-2.0

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use stackaudit_core::{AdapterError, CommandCapture, ProcessRunner};
use tracing::{debug, warn};

use super::normalize_line_endings;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Runs a program in the repository root with stdout and stderr spooled to
/// anonymous files, killing it once `timeout` elapses.
#[derive(Debug, Default)]
pub struct RealProcessRunner;

fn process_error(program: &str, detail: impl ToString) -> AdapterError {
    AdapterError::Process {
        program: program.to_string(),
        detail: detail.to_string(),
    }
}

fn read_spool(program: &str, file: &mut File) -> Result<String, AdapterError> {
    file.seek(SeekFrom::Start(0))
        .map_err(|err| process_error(program, err))?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)
        .map_err(|err| process_error(program, err))?;
    Ok(normalize_line_endings(&String::from_utf8_lossy(&bytes)))
}

impl ProcessRunner for RealProcessRunner {
    fn run_captured(
        &self,
        program: &str,
        args: &[String],
        repo_root: &Path,
        timeout: Duration,
    ) -> Result<CommandCapture, AdapterError> {
        let mut stdout = tempfile::tempfile().map_err(|err| process_error(program, err))?;
        let mut stderr = tempfile::tempfile().map_err(|err| process_error(program, err))?;
        let stdout_handle = stdout.try_clone().map_err(|err| process_error(program, err))?;
        let stderr_handle = stderr.try_clone().map_err(|err| process_error(program, err))?;

        let mut child = Command::new(program)
            .args(args)
            .current_dir(repo_root)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout_handle))
            .stderr(Stdio::from(stderr_handle))
            .spawn()
            .map_err(|err| process_error(program, err))?;
        debug!(program, pid = child.id(), "spawned");

        let started = Instant::now();
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {
                    if started.elapsed() > timeout {
                        let _ = child.kill();
                        let _ = child.wait();
                        warn!(program, seconds = timeout.as_secs(), "killed after timeout");
                        return Err(AdapterError::Timeout {
                            program: program.to_string(),
                            seconds: timeout.as_secs(),
                        });
                    }
                    thread::sleep(POLL_INTERVAL);
                }
                Err(err) => {
                    let _ = child.kill();
                    return Err(process_error(program, err));
                }
            }
        };

        Ok(CommandCapture {
            program: program.to_string(),
            args: args.to_vec(),
            status: status.code().unwrap_or(1),
            stdout: read_spool(program, &mut stdout)?,
            stderr: read_spool(program, &mut stderr)?,
        })
    }
}
