use std::io;
#[cfg(test)] use mockall::automock;

/// Identifies the process that opened a connection
pub type OwnerId = u32;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Liveness {
    Alive,
    Gone,
}

/// Checks whether the owner of a connection still exists. An error means that liveness could
///  not be determined, which is fatal for reclamation.
#[cfg_attr(test, automock)]
pub trait LivenessProbe: Send + Sync + 'static {
    fn probe(&self, owner: OwnerId) -> io::Result<Liveness>;
}

/// Probes OS processes by sending them the null signal
pub struct ProcessLivenessProbe;

impl LivenessProbe for ProcessLivenessProbe {
    fn probe(&self, owner: OwnerId) -> io::Result<Liveness> {
        let pid = match libc::pid_t::try_from(owner) {
            Ok(pid) if pid > 0 => pid,
            _ => return Err(io::Error::new(io::ErrorKind::InvalidInput, format!("{} is not a valid process id", owner))),
        };

        // SAFETY: signal 0 performs only the existence and permission checks
        if unsafe { libc::kill(pid, 0) } == 0 {
            return Ok(Liveness::Alive);
        }

        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            Ok(Liveness::Gone)
        }
        else {
            Err(err)
        }
    }
}
