use async_trait::async_trait;
use common::BridgeResult;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tokio::process::Child;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    Stopped,
    Starting,
    Running,
    Crashed,
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProcessState::Stopped => "stopped",
            ProcessState::Starting => "starting",
            ProcessState::Running => "running",
            ProcessState::Crashed => "crashed",
        };
        f.write_str(s)
    }
}

/// A spawned child the publisher can poll and stop.
#[async_trait]
pub trait ManagedChild: Send {
    /// `Some(description)` once the child has exited.
    fn try_exited(&mut self) -> std::io::Result<Option<String>>;

    /// Stop the child and reap it.
    async fn terminate(&mut self) -> std::io::Result<()>;
}

/// Spawns the media server.
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    async fn launch(&self) -> BridgeResult<Box<dyn ManagedChild>>;
}

const TERMINATE_GRACE: Duration = Duration::from_secs(5);

pub struct TokioChild {
    child: Child,
    grace: Duration,
}

impl TokioChild {
    pub fn new(child: Child) -> Self {
        Self {
            child,
            grace: TERMINATE_GRACE,
        }
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Ask the child to exit on its own. The media server only stops its
    /// `runOnInit` publishers when it gets the chance to shut down.
    #[cfg(unix)]
    fn request_stop(&self) -> std::io::Result<()> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let Some(pid) = self.child.id() else {
            return Ok(());
        };
        kill(Pid::from_raw(pid as i32), Signal::SIGTERM).map_err(std::io::Error::from)
    }

    #[cfg(not(unix))]
    fn request_stop(&self) -> std::io::Result<()> {
        Ok(())
    }
}

#[async_trait]
impl ManagedChild for TokioChild {
    fn try_exited(&mut self) -> std::io::Result<Option<String>> {
        Ok(self.child.try_wait()?.map(|status| status.to_string()))
    }

    async fn terminate(&mut self) -> std::io::Result<()> {
        if self.child.try_wait()?.is_some() {
            return Ok(());
        }

        match self.request_stop() {
            Ok(()) => {
                if let Ok(status) = tokio::time::timeout(self.grace, self.child.wait()).await {
                    let status = status?;
                    debug!(%status, "child exited after SIGTERM");
                    return Ok(());
                }
                warn!(pid = ?self.child.id(), grace_ms = self.grace.as_millis() as u64, "child ignored SIGTERM, killing");
            }
            Err(e) => warn!(error = %e, "failed to signal child, killing"),
        }

        self.child.start_kill()?;
        match tokio::time::timeout(TERMINATE_GRACE, self.child.wait()).await {
            Ok(status) => {
                status?;
                Ok(())
            }
            Err(_) => {
                warn!(pid = ?self.child.id(), "child did not exit after kill");
                Ok(())
            }
        }
    }
}
