//! Household simulation access.
//!
//! The simulation is batched (one environment per batch in practice).
//! [`ProcessSimulation`] keeps a bridge process alive for a whole trial and
//! exchanges one JSON object per line with it.

use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Stdio};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use wait_timeout::ChildExt;

use crate::io::process::command_from_argv;

const CLOSE_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetOutcome {
    /// Initial observation, welcome banner included.
    pub observation: String,
    /// Path of the game file backing this environment.
    pub gamefile: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepBatch {
    pub observations: Vec<String>,
    pub rewards: Vec<f64>,
    pub dones: Vec<bool>,
    pub won: Vec<bool>,
}

/// First environment's slice of a [`StepBatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepResult {
    pub observation: String,
    pub done: bool,
    pub won: bool,
}

impl StepBatch {
    pub fn first(&self) -> Result<StepResult> {
        let observation = self
            .observations
            .first()
            .ok_or_else(|| anyhow!("step batch has no observations"))?;
        Ok(StepResult {
            observation: observation.clone(),
            done: self.dones.first().copied().unwrap_or(false),
            won: self.won.first().copied().unwrap_or(false),
        })
    }
}

pub trait Simulation {
    fn reset(&mut self) -> Result<ResetOutcome>;

    fn step(&mut self, actions: &[String]) -> Result<StepBatch>;

    fn close(&mut self) -> Result<()>;
}

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum BridgeRequest<'a> {
    Reset,
    Step { actions: &'a [String] },
    Close,
}

/// Simulation reached through a long-lived bridge process.
pub struct ProcessSimulation {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    closed: bool,
}

impl ProcessSimulation {
    #[instrument(skip_all, fields(program = command.first().map(String::as_str).unwrap_or_default()))]
    pub fn spawn(command: &[String]) -> Result<Self> {
        let mut cmd = command_from_argv(command).context("simulation command")?;
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        let mut child = cmd.spawn().context("spawn simulation bridge")?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("stdout was not piped"))?;
        info!("simulation bridge started");
        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
            closed: false,
        })
    }

    fn call<T: DeserializeOwned>(&mut self, request: &BridgeRequest<'_>) -> Result<T> {
        if self.closed {
            bail!("simulation bridge already closed");
        }
        let mut line = serde_json::to_string(request).context("serialize bridge request")?;
        line.push('\n');
        self.stdin
            .write_all(line.as_bytes())
            .and_then(|()| self.stdin.flush())
            .context("write bridge request")?;

        let mut reply = String::new();
        let n = self
            .stdout
            .read_line(&mut reply)
            .context("read bridge reply")?;
        if n == 0 {
            bail!("simulation bridge exited unexpectedly");
        }
        debug!(bytes = n, "bridge reply");
        serde_json::from_str(&reply).with_context(|| format!("parse bridge reply: {}", reply.trim()))
    }
}

impl Simulation for ProcessSimulation {
    fn reset(&mut self) -> Result<ResetOutcome> {
        self.call(&BridgeRequest::Reset)
    }

    fn step(&mut self, actions: &[String]) -> Result<StepBatch> {
        self.call(&BridgeRequest::Step { actions })
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        let _: serde_json::Value = self.call(&BridgeRequest::Close)?;
        self.closed = true;
        match self
            .child
            .wait_timeout(CLOSE_GRACE)
            .context("wait for simulation bridge")?
        {
            Some(status) => debug!(exit_code = ?status.code(), "simulation bridge exited"),
            None => {
                warn!("simulation bridge did not exit, killing");
                self.child.kill().context("kill simulation bridge")?;
                self.child.wait().context("wait after kill")?;
            }
        }
        Ok(())
    }
}

impl Drop for ProcessSimulation {
    fn drop(&mut self) {
        if !self.closed && self.child.kill().is_ok() {
            let _ = self.child.wait();
        }
    }
}
