//! Small process-related helpers shared across the workspace.
//!
//! Encoder children are spawned into their own process group so a stop
//! request can take down the whole tree (ffmpeg plus any muxer children it
//! forks) with a single group signal.

use std::ffi::OsStr;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
}

impl NoWindowExt for std::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Place the child in its own process group (Unix).
///
/// On Windows this is a no-op; children are addressed individually there.
pub trait ProcessGroupExt {
    fn own_process_group(&mut self);
}

impl ProcessGroupExt for std::process::Command {
    fn own_process_group(&mut self) {
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            self.process_group(0);
        }
    }
}

/// Create a `std::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
pub fn std_command(program: impl AsRef<OsStr>) -> std::process::Command {
    let mut cmd = std::process::Command::new(program);
    cmd.no_window();
    cmd
}

#[cfg(feature = "tokio")]
impl NoWindowExt for tokio::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.as_std_mut().creation_flags(CREATE_NO_WINDOW);
        }
    }
}

#[cfg(feature = "tokio")]
impl ProcessGroupExt for tokio::process::Command {
    fn own_process_group(&mut self) {
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            self.as_std_mut().process_group(0);
        }
    }
}

/// Create a `tokio::process::Command` with no-window and own-process-group
/// applied, ready for supervised spawning.
#[cfg(feature = "tokio")]
pub fn tokio_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.no_window();
    cmd.own_process_group();
    cmd
}

/// Send SIGTERM to the process group led by `pid`.
///
/// A vanished group (ESRCH) is success: the processes are already gone.
#[cfg(unix)]
pub fn terminate_group(pid: u32) -> std::io::Result<()> {
    signal_group(pid, nix::sys::signal::Signal::SIGTERM)
}

/// Send SIGKILL to the process group led by `pid`.
#[cfg(unix)]
pub fn kill_group(pid: u32) -> std::io::Result<()> {
    signal_group(pid, nix::sys::signal::Signal::SIGKILL)
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: nix::sys::signal::Signal) -> std::io::Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    // Negative pid addresses the whole group.
    match kill(Pid::from_raw(-(pid as i32)), signal) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(std::io::Error::from_raw_os_error(e as i32)),
    }
}

/// Check whether a process with `pid` still exists (signal 0 probe).
#[cfg(unix)]
pub fn process_exists(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    kill(Pid::from_raw(pid as i32), None).is_ok()
}

#[cfg(windows)]
pub fn terminate_group(_pid: u32) -> std::io::Result<()> {
    // No process groups on Windows; callers fall back to Child::kill.
    Ok(())
}

#[cfg(windows)]
pub fn kill_group(_pid: u32) -> std::io::Result<()> {
    Ok(())
}

#[cfg(windows)]
pub fn process_exists(_pid: u32) -> bool {
    false
}
