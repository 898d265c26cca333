//! Dedicated signal-handling thread, the same shape as `server.c`'s
//! `sig_handler`: `SIGHUP`/`SIGINT`/`SIGQUIT` are blocked process-wide before
//! any other thread is spawned, then a single thread blocks in `sigwait`
//! and reports what it got across a self-pipe the dispatcher's poll loop
//! can multiplex alongside every socket it already watches.
//!
//! `SIGPIPE` is ignored the same way: writing to a peer that already closed
//! its read end must surface as a normal I/O error, not kill the process.

use std::mem::MaybeUninit;
use std::os::unix::io::RawFd;

/// What the signal thread observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownKind {
    /// `SIGHUP`: stop accepting new connections, keep serving existing ones.
    Soft,
    /// `SIGINT`/`SIGQUIT`: stop as soon as possible.
    Hard,
}

/// The read end of the self-pipe the dispatcher polls for shutdown
/// notifications, plus the handle of the thread that feeds it.
pub struct SignalChannel {
    pub read_fd: RawFd,
    write_fd: RawFd,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl SignalChannel {
    /// Blocks `SIGHUP`, `SIGINT`, and `SIGQUIT` for the calling thread (and
    /// therefore every thread spawned after this call, since masks are
    /// inherited), ignores `SIGPIPE`, and starts the dedicated signal
    /// thread. Must be called before the worker pool and dispatcher threads
    /// are spawned.
    pub fn install() -> std::io::Result<Self> {
        // SAFETY: `mask` is fully initialized by `sigemptyset` before any
        // other field access; the signal numbers added are valid.
        unsafe {
            let mut mask = MaybeUninit::<libc::sigset_t>::uninit();
            if libc::sigemptyset(mask.as_mut_ptr()) != 0 {
                return Err(std::io::Error::last_os_error());
            }
            let mut mask = mask.assume_init();
            for sig in [libc::SIGHUP, libc::SIGINT, libc::SIGQUIT] {
                libc::sigaddset(&mut mask, sig);
            }
            if libc::pthread_sigmask(libc::SIG_BLOCK, &mask, std::ptr::null_mut()) != 0 {
                return Err(std::io::Error::last_os_error());
            }

            let mut action: libc::sigaction = std::mem::zeroed();
            action.sa_sigaction = libc::SIG_IGN;
            if libc::sigaction(libc::SIGPIPE, &action, std::ptr::null_mut()) != 0 {
                return Err(std::io::Error::last_os_error());
            }

            let mut fds = [0i32; 2];
            if libc::pipe(fds.as_mut_ptr()) != 0 {
                return Err(std::io::Error::last_os_error());
            }
            let (read_fd, write_fd) = (fds[0], fds[1]);

            let handle = std::thread::Builder::new().name("storage-signals".to_owned()).spawn(move || signal_loop(mask, write_fd))?;

            Ok(Self { read_fd, write_fd, handle: Some(handle) })
        }
    }

    /// Drains one byte from the self-pipe and decodes which shutdown kind
    /// it encodes. Called by the dispatcher once `poll` reports `read_fd`
    /// readable.
    pub fn recv(&self) -> std::io::Result<ShutdownKind> {
        let mut byte = [0u8; 1];
        // SAFETY: `byte` is a valid 1-byte buffer for the duration of the call.
        let n = unsafe { libc::read(self.read_fd, byte.as_mut_ptr().cast(), 1) };
        if n <= 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(if byte[0] == 0 { ShutdownKind::Soft } else { ShutdownKind::Hard })
    }
}

impl Drop for SignalChannel {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            // SAFETY: `SIGUSR1` is added to the already-blocked `mask` only
            // inside `signal_loop`; raising it here unblocks that thread's
            // `sigwait` so it can exit instead of leaking past process exit.
            unsafe {
                libc::pthread_kill(handle_to_pthread(&handle), libc::SIGUSR1);
            }
            let _ = handle.join();
        }
        // SAFETY: both fds were opened by this struct's `install` and are
        // not shared with any other owner.
        unsafe {
            libc::close(self.read_fd);
            libc::close(self.write_fd);
        }
    }
}

/// `JoinHandle` only exposes a portable thread id, not the raw `pthread_t`
/// `pthread_kill` needs; on the platforms this server targets the two are
/// the same representation, and nothing else assumes otherwise.
fn handle_to_pthread(handle: &std::thread::JoinHandle<()>) -> libc::pthread_t {
    use std::os::unix::thread::JoinHandleExt;
    handle.as_pthread_t()
}

fn signal_loop(mut mask: libc::sigset_t, write_fd: RawFd) {
    // SAFETY: `mask` came from `SignalChannel::install`, already contains
    // the three shutdown signals, and is valid for `sigaddset`/`sigwait`.
    unsafe {
        libc::sigaddset(&mut mask, libc::SIGUSR1);
        let _ = libc::pthread_sigmask(libc::SIG_BLOCK, &mask, std::ptr::null_mut());

        let mut sig = 0i32;
        if libc::sigwait(&mask, &mut sig) != 0 {
            return;
        }

        let byte: [u8; 1] = match sig {
            libc::SIGHUP => [0u8],
            libc::SIGINT | libc::SIGQUIT => [1u8],
            _ => return, // SIGUSR1: asked to exit by `Drop`, nothing to report.
        };
        let _ = libc::write(write_fd, byte.as_ptr().cast(), 1);
    }
}
