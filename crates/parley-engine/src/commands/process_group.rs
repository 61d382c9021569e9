use std::io;

/// Send SIGINT to the process group led by `pid`.
///
/// Sessions are spawned as group leaders, so the group id equals the pid.
/// A group that is already gone is not an error.
#[cfg(unix)]
pub(crate) fn interrupt_group(pid: u32) -> io::Result<()> {
    let pgid = pid as libc::pid_t;
    if pgid <= 0 || pgid == unsafe { libc::getpgrp() } {
        // Never signal our own group.
        return Ok(());
    }

    let result = unsafe { libc::kill(-pgid, libc::SIGINT) };
    if result == -1 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            return Err(err);
        }
    }
    Ok(())
}

#[cfg(not(unix))]
pub(crate) fn interrupt_group(_pid: u32) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "process group signals are only supported on unix",
    ))
}
