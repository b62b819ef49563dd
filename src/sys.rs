use std::fs::File;
use std::io;
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd};

use libc::{c_int, c_short, pollfd, POLLIN};

/// What woke a watcher out of [`wait_event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Wake {
    Event,
    Stop,
}

/// Block until `events` reports any of `interest`, or `stop` becomes readable
/// or hangs up. The stop fd wins when both are ready.
pub(crate) fn wait_event(
    events: BorrowedFd<'_>,
    interest: c_short,
    stop: BorrowedFd<'_>,
) -> io::Result<Wake> {
    let mut fds = [
        pollfd {
            fd: events.as_raw_fd(),
            events: interest,
            revents: 0,
        },
        pollfd {
            fd: stop.as_raw_fd(),
            events: POLLIN,
            revents: 0,
        },
    ];
    loop {
        let ret = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, -1) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        if fds[1].revents != 0 {
            return Ok(Wake::Stop);
        }
        if fds[0].revents & libc::POLLNVAL != 0 {
            return Err(io::Error::from_raw_os_error(libc::EBADF));
        }
        if fds[0].revents != 0 {
            return Ok(Wake::Event);
        }
    }
}

/// Close-on-exec pipe, returned as `(read, write)`.
pub(crate) fn pipe() -> io::Result<(File, File)> {
    let mut fds: [c_int; 2] = [-1; 2];
    if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) } == -1 {
        return Err(io::Error::last_os_error());
    }
    // pipe2 hands over ownership of both descriptors.
    unsafe { Ok((File::from_raw_fd(fds[0]), File::from_raw_fd(fds[1]))) }
}

/// Bytes that can be read from `fd` without blocking.
pub(crate) fn pending_bytes(fd: BorrowedFd<'_>) -> io::Result<usize> {
    let mut count: c_int = 0;
    if unsafe { libc::ioctl(fd.as_raw_fd(), libc::FIONREAD, &mut count as *mut c_int) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(count.max(0) as usize)
}

/// Move the calling thread to SCHED_RR, clamping to the scheduler maximum.
pub(crate) fn set_realtime_priority(priority: i32) -> io::Result<()> {
    let max = unsafe { libc::sched_get_priority_max(libc::SCHED_RR) };
    if max == -1 {
        return Err(io::Error::last_os_error());
    }
    let mut param: libc::sched_param = unsafe { std::mem::zeroed() };
    param.sched_priority = priority.min(max);
    if unsafe { libc::sched_setscheduler(0, libc::SCHED_RR, &param) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
