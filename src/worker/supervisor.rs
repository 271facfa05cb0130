//! # Process Supervisor
//!
//! Launches N worker processes and stops them. Each child gets a piped
//! stdin; closing it is the graceful stop signal (children started with
//! `--supervised` treat stdin EOF like SIGTERM). Children still alive after
//! the kill grace period are killed.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use serde::Serialize;
use tokio::process::{Child, Command};
use tracing::{error, info, warn};

use crate::error::{Result, WorkerError};

type ArgsFor = Box<dyn Fn(u32) -> Vec<OsString> + Send + Sync>;

/// Outcome of stopping the supervised processes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SupervisorReport {
    pub exited: usize,
    pub killed: usize,
}

#[derive(Debug)]
struct SupervisedChild {
    worker_id: u32,
    child: Child,
}

pub struct Supervisor {
    program: PathBuf,
    worker_ids: Vec<u32>,
    kill_grace: Duration,
    args_for: ArgsFor,
    children: Vec<SupervisedChild>,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("program", &self.program)
            .field("worker_ids", &self.worker_ids)
            .field("kill_grace", &self.kill_grace)
            .field("running", &self.children.len())
            .finish()
    }
}

impl Supervisor {
    /// `args_for` builds the command line of the child with a given worker id
    pub fn new<F>(
        program: impl Into<PathBuf>,
        first_worker_id: u32,
        processes: u32,
        kill_grace: Duration,
        args_for: F,
    ) -> Self
    where
        F: Fn(u32) -> Vec<OsString> + Send + Sync + 'static,
    {
        Self {
            program: program.into(),
            worker_ids: (0..processes).map(|i| first_worker_id + i).collect(),
            kill_grace,
            args_for: Box::new(args_for),
            children: Vec::new(),
        }
    }

    /// Supervisor re-executing the current binary with `run --worker-id <id> --supervised`
    pub fn for_current_exe(
        first_worker_id: u32,
        processes: u32,
        kill_grace: Duration,
        mut base_args: Vec<OsString>,
    ) -> Result<Self> {
        let program = std::env::current_exe()
            .map_err(|e| WorkerError::Supervisor(format!("cannot locate executable: {e}")))?;
        base_args.push("run".into());
        Ok(Self::new(
            program,
            first_worker_id,
            processes,
            kill_grace,
            move |worker_id| {
                let mut args = base_args.clone();
                args.push("--worker-id".into());
                args.push(worker_id.to_string().into());
                args.push("--supervised".into());
                args
            },
        ))
    }

    pub fn running(&self) -> usize {
        self.children.len()
    }

    /// Spawn every worker process; on failure the already-spawned ones are stopped
    pub async fn spawn_all(&mut self) -> Result<()> {
        for worker_id in self.worker_ids.clone() {
            let spawned = Command::new(&self.program)
                .args((self.args_for)(worker_id))
                .stdin(Stdio::piped())
                .kill_on_drop(true)
                .spawn();
            match spawned {
                Ok(child) => {
                    info!(worker_id = worker_id, pid = ?child.id(), "👷 Worker process started");
                    self.children.push(SupervisedChild { worker_id, child });
                }
                Err(e) => {
                    error!(worker_id = worker_id, error = %e, "Failed to start worker process");
                    self.shutdown().await;
                    return Err(WorkerError::Supervisor(format!(
                        "failed to start worker {worker_id}: {e}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Wait until any child exits on its own
    pub async fn wait_any(&mut self) -> Option<(u32, ExitStatus)> {
        if self.children.is_empty() {
            return None;
        }
        let waits = self
            .children
            .iter_mut()
            .map(|supervised| Box::pin(supervised.child.wait()));
        let (status, index, _) = futures::future::select_all(waits).await;
        let supervised = self.children.remove(index);
        match status {
            Ok(status) => {
                warn!(worker_id = supervised.worker_id, status = %status, "Worker process exited");
                Some((supervised.worker_id, status))
            }
            Err(e) => {
                error!(worker_id = supervised.worker_id, error = %e, "Lost track of worker process");
                None
            }
        }
    }

    /// Close every child's stdin, wait the grace period, kill the rest
    pub async fn shutdown(&mut self) -> SupervisorReport {
        let mut report = SupervisorReport::default();
        if self.children.is_empty() {
            return report;
        }
        info!(
            processes = self.children.len(),
            kill_grace_ms = self.kill_grace.as_millis() as u64,
            "🛑 Stopping worker processes"
        );

        for supervised in &mut self.children {
            drop(supervised.child.stdin.take());
        }

        let deadline = tokio::time::Instant::now() + self.kill_grace;
        for mut supervised in self.children.drain(..) {
            match tokio::time::timeout_at(deadline, supervised.child.wait()).await {
                Ok(Ok(status)) => {
                    info!(worker_id = supervised.worker_id, status = %status, "Worker process exited");
                    report.exited += 1;
                }
                Ok(Err(e)) => {
                    error!(worker_id = supervised.worker_id, error = %e, "Failed waiting for worker process");
                    report.exited += 1;
                }
                Err(_) => {
                    warn!(worker_id = supervised.worker_id, "Worker process ignored stop; killing");
                    if let Err(e) = supervised.child.kill().await {
                        error!(worker_id = supervised.worker_id, error = %e, "Failed to kill worker process");
                    }
                    report.killed += 1;
                }
            }
        }

        report
    }
}
