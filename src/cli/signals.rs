//! Signal handling for graceful cancellation

use std::fmt;

/// Exit code for a run stopped by cancellation
pub const EXIT_CANCELLED: i32 = 130;

/// Which signal asked us to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    Interrupt,
    Terminate,
}

impl Shutdown {
    /// Conventional shell exit code for the signal
    pub fn exit_code(self) -> i32 {
        match self {
            Shutdown::Interrupt => EXIT_CANCELLED,
            Shutdown::Terminate => 143,
        }
    }
}

impl fmt::Display for Shutdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shutdown::Interrupt => f.write_str("SIGINT"),
            Shutdown::Terminate => f.write_str("SIGTERM"),
        }
    }
}

/// Wait for SIGINT or SIGTERM (Ctrl+C elsewhere)
///
/// Fails only if the handlers cannot be installed.
pub async fn shutdown_signal() -> std::io::Result<Shutdown> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = sigint.recv() => Ok(Shutdown::Interrupt),
            _ = sigterm.recv() => Ok(Shutdown::Terminate),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        Ok(Shutdown::Interrupt)
    }
}
