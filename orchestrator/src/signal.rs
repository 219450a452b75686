//! Forwards interrupt/termination signals from the host to the running child.

use async_trait::async_trait;
use std::future::Future;
use std::io;
use std::process::ExitStatus;
use tokio::process::Child;
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[cfg(unix)]
use tokio::signal::unix::{signal, Signal, SignalKind};

use crate::error::RunError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    Interrupt,
    Terminate,
}

impl Interrupt {
    #[cfg(unix)]
    pub fn signo(self) -> libc::c_int {
        match self {
            Interrupt::Interrupt => libc::SIGINT,
            Interrupt::Terminate => libc::SIGTERM,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Interrupt::Interrupt => "SIGINT",
            Interrupt::Terminate => "SIGTERM",
        }
    }
}

/// Source of interrupts for one run. Dropping it ends the subscription.
pub enum SignalListener {
    #[cfg(unix)]
    Os {
        interrupt: Signal,
        terminate: Signal,
    },
    #[cfg(not(unix))]
    Os,
    Channel(mpsc::UnboundedReceiver<Interrupt>),
}

impl SignalListener {
    pub fn os() -> io::Result<Self> {
        #[cfg(unix)]
        {
            Ok(SignalListener::Os {
                interrupt: signal(SignalKind::interrupt())?,
                terminate: signal(SignalKind::terminate())?,
            })
        }
        #[cfg(not(unix))]
        {
            Ok(SignalListener::Os)
        }
    }

    /// A listener fed by hand, for embedding hosts and tests.
    pub fn channel() -> (mpsc::UnboundedSender<Interrupt>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, SignalListener::Channel(rx))
    }

    /// `None` once no further signals can arrive.
    pub async fn recv(&mut self) -> Option<Interrupt> {
        match self {
            #[cfg(unix)]
            SignalListener::Os {
                interrupt,
                terminate,
            } => tokio::select! {
                received = interrupt.recv() => received.map(|_| Interrupt::Interrupt),
                received = terminate.recv() => received.map(|_| Interrupt::Terminate),
            },
            #[cfg(not(unix))]
            SignalListener::Os => tokio::signal::ctrl_c()
                .await
                .ok()
                .map(|_| Interrupt::Interrupt),
            SignalListener::Channel(rx) => rx.recv().await,
        }
    }
}

/// Called after a signal has been forwarded to the execution handle.
#[async_trait]
pub trait SignalHook: Send + Sync {
    async fn on_signal(&self, signal: Interrupt);
}

/// The thing running the user's code.
pub enum ExecutionHandle {
    Subprocess { program: String, child: Child },
    Container { container_id: String, logs: Child },
}

impl ExecutionHandle {
    pub fn describe(&self) -> String {
        match self {
            ExecutionHandle::Subprocess { program, .. } => program.clone(),
            ExecutionHandle::Container { container_id, .. } => {
                format!("logs of container {}", container_id)
            }
        }
    }

    pub fn signal_target(&self) -> SignalTarget {
        let child = match self {
            ExecutionHandle::Subprocess { child, .. } => child,
            ExecutionHandle::Container { logs, .. } => logs,
        };
        SignalTarget {
            pid: child.id(),
            label: self.describe(),
        }
    }

    pub async fn wait(&mut self) -> Result<ExitStatus, RunError> {
        let program = self.describe();
        let child = match self {
            ExecutionHandle::Subprocess { child, .. } => child,
            ExecutionHandle::Container { logs, .. } => logs,
        };
        child
            .wait()
            .await
            .map_err(|source| RunError::Wait { program, source })
    }
}

/// Process id captured at launch so signals can be sent while the handle is
/// borrowed by `wait`.
#[derive(Debug, Clone)]
pub struct SignalTarget {
    pid: Option<u32>,
    label: String,
}

impl SignalTarget {
    pub fn deliver(&self, signal: Interrupt) -> io::Result<()> {
        let pid = self.pid.ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "process has already been reaped")
        })?;

        #[cfg(unix)]
        {
            let rc = unsafe { libc::kill(pid as libc::pid_t, signal.signo()) };
            if rc == 0 {
                Ok(())
            } else {
                Err(io::Error::last_os_error())
            }
        }
        #[cfg(not(unix))]
        {
            let _ = (pid, signal);
            Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "signal forwarding is only supported on unix",
            ))
        }
    }
}

/// Waits for `handle` while forwarding every received signal to it, then
/// running `hook`. A closed listener just stops being polled.
pub async fn bridge(
    handle: &mut ExecutionHandle,
    listener: &mut SignalListener,
    hook: Option<&dyn SignalHook>,
) -> Result<ExitStatus, RunError> {
    let target = handle.signal_target();
    let wait = handle.wait();
    tokio::pin!(wait);

    let mut listening = true;
    loop {
        tokio::select! {
            status = &mut wait => return status,
            received = listener.recv(), if listening => match received {
                Some(signal) => {
                    debug!("Forwarding {} to {}", signal.name(), target.label);
                    if let Err(e) = target.deliver(signal) {
                        warn!("Failed to forward {} to {}: {}", signal.name(), target.label, e);
                    }
                    if let Some(hook) = hook {
                        hook.on_signal(signal).await;
                    }
                }
                None => listening = false,
            },
        }
    }
}

/// Drives a preparatory step unless a signal arrives first. The step is
/// dropped on a signal and the run fails with [`RunError::Interrupted`], so
/// callers unwind through their cleanup instead of the process dying.
pub async fn interruptible<T, F>(listener: &mut SignalListener, step: F) -> Result<T, RunError>
where
    F: Future<Output = Result<T, RunError>>,
{
    tokio::pin!(step);

    let mut listening = true;
    loop {
        tokio::select! {
            result = &mut step => return result,
            received = listener.recv(), if listening => match received {
                Some(signal) => {
                    debug!("Received {} while preparing the run", signal.name());
                    return Err(RunError::Interrupted { signal });
                }
                None => listening = false,
            },
        }
    }
}
