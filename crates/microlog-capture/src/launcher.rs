//! Producer process launching and environment preparation.
//!
//! The producer may be built with AddressSanitizer but not linked against its
//! runtime first. Such a binary refuses to start unless the ASan runtime is
//! preloaded, so [`PreloadProbe::prepare`] runs it once with a harmless
//! argument, inspects stderr, and injects the runtime into `LD_PRELOAD` for
//! the real invocation.

use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, ChildStdout, Command, ExitStatus, Stdio};
use std::thread::JoinHandle;

use serde::{Deserialize, Serialize};

use crate::error::CaptureError;

/// Environment handed to the producer, in a stable order.
pub type EnvMap = BTreeMap<String, String>;

/// Printed by an ASan-instrumented binary whose runtime was not loaded first.
pub const ASAN_PRELOAD_MESSAGE: &str = "ASan runtime does not come first in initial library list; you should either link runtime to your application or manually preload it with LD_PRELOAD";

/// Snapshot of the harness's own environment (non-UTF-8 entries are dropped).
#[must_use]
pub fn inherited_env() -> EnvMap {
    std::env::vars_os()
        .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
        .collect()
}

/// How to detect and satisfy a missing runtime preload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreloadProbe {
    /// Argument used for the detection run.
    pub probe_arg: String,
    /// Substring of the detection run's stderr that means "preload required".
    pub marker: String,
    /// Toolchain driver that knows where the runtime lives.
    pub compiler: String,
    pub library: String,
    /// Variable that receives the resolved library path.
    pub variable: String,
}

impl Default for PreloadProbe {
    fn default() -> Self {
        Self {
            probe_arg: "--help".to_string(),
            marker: ASAN_PRELOAD_MESSAGE.to_string(),
            compiler: "gcc".to_string(),
            library: "libasan.so".to_string(),
            variable: "LD_PRELOAD".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PreloadDecision {
    NotRequired,
    Injected { variable: String, path: String },
}

#[derive(Debug, Clone)]
pub struct PreparedEnvironment {
    pub vars: EnvMap,
    pub preload: PreloadDecision,
}

impl PreloadProbe {
    /// Build the environment for running `binary`, starting from the
    /// harness's own environment.
    pub fn prepare(&self, binary: &Path) -> Result<PreparedEnvironment, CaptureError> {
        self.prepare_from(binary, inherited_env())
    }

    pub fn prepare_from(
        &self,
        binary: &Path,
        mut vars: EnvMap,
    ) -> Result<PreparedEnvironment, CaptureError> {
        // The detection run is fully reaped here; nothing of it reaches the real run.
        let probe = Command::new(binary)
            .arg(&self.probe_arg)
            .env_clear()
            .envs(&vars)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| CaptureError::Spawn {
                program: binary.display().to_string(),
                source,
            })?;

        let stderr = String::from_utf8_lossy(&probe.stderr);
        if !stderr.contains(&self.marker) {
            return Ok(PreparedEnvironment {
                vars,
                preload: PreloadDecision::NotRequired,
            });
        }

        let path = self.resolve_library(&vars)?;
        vars.insert(self.variable.clone(), path.clone());
        Ok(PreparedEnvironment {
            vars,
            preload: PreloadDecision::Injected {
                variable: self.variable.clone(),
                path,
            },
        })
    }

    fn resolve_library(&self, vars: &EnvMap) -> Result<String, CaptureError> {
        let output = Command::new(&self.compiler)
            .arg(format!("-print-file-name={}", self.library))
            .env_clear()
            .envs(vars)
            .stdin(Stdio::null())
            .output()
            .map_err(|err| CaptureError::EnvironmentPreparation {
                reason: format!("cannot run {}: {err}", self.compiler),
            })?;
        if !output.status.success() {
            return Err(CaptureError::EnvironmentPreparation {
                reason: format!(
                    "{} -print-file-name={} exited with {}",
                    self.compiler, self.library, output.status
                ),
            });
        }

        let path = String::from_utf8_lossy(&output.stdout)
            .trim_end_matches(['\n', '\r'])
            .to_string();
        // gcc echoes the bare name when it cannot locate the file.
        if path.is_empty() || !Path::new(&path).is_absolute() {
            return Err(CaptureError::EnvironmentPreparation {
                reason: format!("{} could not locate {}", self.compiler, self.library),
            });
        }
        Ok(path)
    }
}

/// Starts the producer binary with a fixed environment.
#[derive(Debug, Clone)]
pub struct ProducerLauncher {
    binary: PathBuf,
    env: EnvMap,
}

impl ProducerLauncher {
    #[must_use]
    pub fn new(binary: impl Into<PathBuf>, env: EnvMap) -> Self {
        Self {
            binary: binary.into(),
            env,
        }
    }

    #[must_use]
    pub fn binary(&self) -> &Path {
        &self.binary
    }

    #[must_use]
    pub fn env(&self) -> &EnvMap {
        &self.env
    }

    /// Spawn the producer with piped stdout/stderr. The pid is readable
    /// immediately; nothing waits for the process here.
    ///
    /// Stderr is drained on a background thread from the start, so a producer
    /// that floods stderr cannot stall on a full pipe while stdout is read.
    pub fn spawn<I, S>(&self, args: I) -> Result<RunningProducer, CaptureError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let args: Vec<String> = args
            .into_iter()
            .map(|a| a.as_ref().to_string_lossy().into_owned())
            .collect();
        let mut child = Command::new(&self.binary)
            .args(&args)
            .env_clear()
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| CaptureError::Spawn {
                program: self.binary.display().to_string(),
                source,
            })?;
        let stderr_drain = child.stderr.take().map(drain_stderr);
        Ok(RunningProducer {
            pid: child.id(),
            child: Some(child),
            args,
            stdout_seen: None,
            stderr_drain,
        })
    }

    /// Spawn and wait, collecting both streams.
    pub fn run<I, S>(&self, args: I) -> Result<ProducerOutput, CaptureError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.spawn(args)?.finish()
    }
}

/// Handle to a live producer process.
///
/// Dropping an unfinished handle kills and reaps the process.
#[derive(Debug)]
pub struct RunningProducer {
    pid: u32,
    child: Option<Child>,
    args: Vec<String>,
    stdout_seen: Option<String>,
    stderr_drain: Option<JoinHandle<std::io::Result<Vec<u8>>>>,
}

fn drain_stderr(mut stderr: ChildStderr) -> JoinHandle<std::io::Result<Vec<u8>>> {
    std::thread::spawn(move || {
        let mut bytes = Vec::new();
        stderr.read_to_end(&mut bytes)?;
        Ok(bytes)
    })
}

impl RunningProducer {
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// The pid rendered the way expectations record it (`%08d`).
    #[must_use]
    pub fn pid_token(&self) -> String {
        format!("{:08}", self.pid)
    }

    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn stdout(&mut self) -> Option<&mut ChildStdout> {
        self.child.as_mut().and_then(|c| c.stdout.as_mut())
    }

    /// Read stdout until the producer closes it.
    pub fn read_stdout_to_end(&mut self) -> Result<String, CaptureError> {
        let mut bytes = Vec::new();
        if let Some(mut out) = self.child.as_mut().and_then(|c| c.stdout.take()) {
            out.read_to_end(&mut bytes)?;
        }
        let text = String::from_utf8_lossy(&bytes).into_owned();
        self.stdout_seen
            .get_or_insert_with(String::new)
            .push_str(&text);
        Ok(text)
    }

    /// Wait for exit and collect whatever remains on both streams.
    pub fn finish(mut self) -> Result<ProducerOutput, CaptureError> {
        let Some(child) = self.child.take() else {
            return Err(CaptureError::Io(std::io::Error::other(
                "producer already reaped",
            )));
        };
        let output = child.wait_with_output()?;
        let mut stdout = self.stdout_seen.take().unwrap_or_default();
        stdout.push_str(&String::from_utf8_lossy(&output.stdout));
        let stderr = match self.stderr_drain.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| std::io::Error::other("stderr reader panicked"))??,
            None => output.stderr,
        };
        Ok(ProducerOutput {
            pid: self.pid,
            status: output.status,
            stdout,
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        })
    }
}

impl Drop for RunningProducer {
    fn drop(&mut self) {
        if let Some(child) = self.child.as_mut() {
            if matches!(child.try_wait(), Ok(None)) {
                let _ = child.kill();
            }
            let _ = child.wait();
        }
    }
}

/// Everything a finished producer left behind.
#[derive(Debug, Clone)]
pub struct ProducerOutput {
    pub pid: u32,
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl ProducerOutput {
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        self.status.code()
    }
}
