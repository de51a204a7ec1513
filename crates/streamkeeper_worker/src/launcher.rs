//! Capture process launching.
//!
//! The recorder is an opaque external program. [`CaptureLauncher`] is the
//! seam: production code uses [`CommandLauncher`], tests substitute doubles
//! that simulate exit codes and hangs without a real binary.
//!
//! On unix every capture runs in its own process group (pgid == pid), so the
//! whole tree can be signalled at once and nothing it forked outlives it.

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use streamkeeper_logging::{open_job_log, JobLog};
use streamkeeper_protocol::JobId;
use tracing::{debug, info, warn};

use crate::error::SpawnError;

/// Bytes of stderr kept in memory per process.
const STDERR_TAIL_BYTES: usize = 4096;
/// How long to wait for output pumps after the process tree is gone.
const PUMP_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);
const TERMINATE_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Everything needed to start one capture process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureCommand {
    pub job_id: JobId,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    /// Directory for the per-job stdout/stderr log. `None` discards output.
    pub log_dir: Option<PathBuf>,
}

/// Starts capture processes.
pub trait CaptureLauncher: Send + Sync {
    fn launch(&self, command: &CaptureCommand) -> Result<Box<dyn CaptureHandle>, SpawnError>;
}

/// A running capture process.
pub trait CaptureHandle: Send {
    /// OS process id. On unix this is also the process group id.
    fn pid(&self) -> u32;

    /// Return code if the process has exited. Signals map to `-signal`.
    fn try_wait(&mut self) -> io::Result<Option<i32>>;

    /// Terminate the whole process tree and reap it.
    ///
    /// Sends SIGTERM to the group, waits up to `grace`, then SIGKILL.
    fn terminate(&mut self, grace: Duration) -> io::Result<i32>;

    /// Kill whatever is left in the process group after the leader exited.
    fn reap_descendants(&mut self) {}

    /// Tail of the process's stderr.
    fn stderr_tail(&mut self) -> String;
}

/// Launches the recorder with `std::process::Command`.
#[derive(Debug, Default, Clone)]
pub struct CommandLauncher;

impl CommandLauncher {
    pub fn new() -> Self {
        Self
    }
}

impl CaptureLauncher for CommandLauncher {
    fn launch(&self, command: &CaptureCommand) -> Result<Box<dyn CaptureHandle>, SpawnError> {
        let program = resolve_program(&command.program)?;

        let mut cmd = Command::new(&program);
        cmd.args(&command.args)
            .current_dir(&command.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let mut child = cmd.spawn().map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                SpawnError::MissingBinary {
                    program: program.clone(),
                }
            } else {
                SpawnError::Io {
                    program: program.clone(),
                    source,
                }
            }
        })?;

        let log = command.log_dir.as_deref().and_then(|dir| {
            match open_job_log(dir, command.job_id.as_str()) {
                Ok(log) => Some(Arc::new(Mutex::new(log))),
                Err(e) => {
                    warn!(job_id = %command.job_id, "Failed to open job log in {}: {}", dir.display(), e);
                    None
                }
            }
        });

        let tail = Arc::new(Mutex::new(Vec::with_capacity(STDERR_TAIL_BYTES)));
        let (done_tx, done_rx) = std_mpsc::channel();
        let mut pumps = 0;
        if let Some(stdout) = child.stdout.take() {
            spawn_pump(stdout, log.clone(), None, done_tx.clone());
            pumps += 1;
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_pump(stderr, log, Some(Arc::clone(&tail)), done_tx);
            pumps += 1;
        }

        info!(
            job_id = %command.job_id,
            pid = child.id(),
            program = %program.display(),
            "Spawned capture process"
        );

        Ok(Box::new(ChildProcess {
            pid: child.id(),
            child,
            tail,
            pumps,
            done_rx,
            reaped: false,
        }))
    }
}

/// Find the recorder binary. Bare names are looked up on `PATH`.
fn resolve_program(program: &Path) -> Result<PathBuf, SpawnError> {
    let has_separator = program.components().count() > 1;
    if has_separator {
        if program.exists() {
            return Ok(program.to_path_buf());
        }
        return Err(SpawnError::MissingBinary {
            program: program.to_path_buf(),
        });
    }
    which::which(program).map_err(|_| SpawnError::MissingBinary {
        program: program.to_path_buf(),
    })
}

fn spawn_pump<R: Read + Send + 'static>(
    mut source: R,
    log: Option<Arc<Mutex<JobLog>>>,
    tail: Option<Arc<Mutex<Vec<u8>>>>,
    done: std_mpsc::Sender<()>,
) {
    thread::spawn(move || {
        let mut buf = [0u8; 8192];
        loop {
            let n = match source.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            if let Some(log) = &log {
                if let Ok(mut log) = log.lock() {
                    let _ = log.write_all(&buf[..n]);
                }
            }
            if let Some(tail) = &tail {
                if let Ok(mut tail) = tail.lock() {
                    tail.extend_from_slice(&buf[..n]);
                    if tail.len() > STDERR_TAIL_BYTES {
                        let excess = tail.len() - STDERR_TAIL_BYTES;
                        tail.drain(..excess);
                    }
                }
            }
        }
        if let Some(log) = &log {
            if let Ok(mut log) = log.lock() {
                let _ = log.flush();
            }
        }
        let _ = done.send(());
    });
}

struct ChildProcess {
    pid: u32,
    child: Child,
    tail: Arc<Mutex<Vec<u8>>>,
    pumps: usize,
    done_rx: std_mpsc::Receiver<()>,
    reaped: bool,
}

impl ChildProcess {
    fn drain_pumps(&mut self) {
        let deadline = Instant::now() + PUMP_DRAIN_TIMEOUT;
        while self.pumps > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.done_rx.recv_timeout(remaining) {
                Ok(()) => self.pumps -= 1,
                Err(_) => {
                    debug!(pid = self.pid, "Output pumps still open after process exit");
                    break;
                }
            }
        }
    }
}

impl CaptureHandle for ChildProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn try_wait(&mut self) -> io::Result<Option<i32>> {
        let status = self.child.try_wait()?;
        if status.is_some() {
            self.reaped = true;
        }
        Ok(status.map(exit_code))
    }

    fn terminate(&mut self, grace: Duration) -> io::Result<i32> {
        if let Some(status) = self.child.try_wait()? {
            self.reaped = true;
            self.reap_descendants();
            return Ok(exit_code(status));
        }

        let code = terminate_child(&mut self.child, self.pid, grace)?;
        self.reaped = true;
        self.reap_descendants();
        Ok(code)
    }

    fn reap_descendants(&mut self) {
        #[cfg(unix)]
        {
            signal_group(self.pid as i32, libc::SIGKILL);
        }
        self.drain_pumps();
    }

    fn stderr_tail(&mut self) -> String {
        match self.tail.lock() {
            Ok(tail) => String::from_utf8_lossy(&tail).into_owned(),
            Err(_) => String::new(),
        }
    }
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        if !self.reaped {
            let _ = self.terminate(Duration::ZERO);
        }
    }
}

#[cfg(unix)]
fn terminate_child(child: &mut Child, pid: u32, grace: Duration) -> io::Result<i32> {
    let pgid = pid as i32;
    signal_group(pgid, libc::SIGTERM);

    let deadline = Instant::now() + grace;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(exit_code(status));
        }
        if Instant::now() >= deadline {
            warn!(pid, "Capture process ignored SIGTERM, killing process group");
            signal_group(pgid, libc::SIGKILL);
            let status = child.wait()?;
            return Ok(exit_code(status));
        }
        thread::sleep(TERMINATE_POLL_INTERVAL);
    }
}

#[cfg(not(unix))]
fn terminate_child(child: &mut Child, _pid: u32, _grace: Duration) -> io::Result<i32> {
    let _ = child.kill();
    let status = child.wait()?;
    Ok(exit_code(status))
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }
    -1
}

/// Send `signal` to every process in group `pgid`. Returns true if delivered.
#[cfg(unix)]
fn signal_group(pgid: i32, signal: i32) -> bool {
    // Never address "every process" (-1) or our own group (0).
    if pgid <= 1 {
        return false;
    }
    // SAFETY: kill(2) takes plain integers and touches no memory of ours.
    unsafe { libc::kill(-pgid, signal) == 0 }
}

/// Whether any process in group `pgid` is still alive.
#[cfg(unix)]
pub fn process_group_alive(pgid: i32) -> bool {
    signal_group(pgid, 0)
}

#[cfg(not(unix))]
pub fn process_group_alive(_pgid: i32) -> bool {
    false
}

/// Identity of a live process that does not survive pid reuse: the boot id
/// plus the kernel start time of `pid`.
///
/// `None` where it cannot be read (no /proc, process gone).
#[cfg(target_os = "linux")]
pub fn process_identity(pid: u32) -> Option<String> {
    let stat = std::fs::read_to_string(format!("/proc/{}/stat", pid)).ok()?;
    // The command name may contain spaces and parens; fields resume after the last ')'.
    let rest = &stat[stat.rfind(')')? + 1..];
    // `rest` starts at field 3 (state); starttime is field 22.
    let start_ticks = rest.split_whitespace().nth(19)?;
    let boot_id = std::fs::read_to_string("/proc/sys/kernel/random/boot_id").ok()?;
    Some(format!("{}:{}", boot_id.trim(), start_ticks))
}

#[cfg(not(target_os = "linux"))]
pub fn process_identity(_pid: u32) -> Option<String> {
    None
}

/// Kill the process group of a capture left behind by an earlier engine.
///
/// The group is only signalled while its leader is still the process that
/// was recorded as `identity` when the capture started. A reused pid, or a
/// platform where identity cannot be read, leaves everything alone.
///
/// Returns true if the group was killed.
pub fn kill_orphaned_capture(pgid: i32, identity: &str, grace: Duration) -> bool {
    if pgid <= 1 {
        return false;
    }
    match process_identity(pgid as u32) {
        Some(current) if current == identity => kill_process_group(pgid, grace),
        Some(_) => {
            info!(pid = pgid, "Recorded pid now belongs to another process, not killing");
            false
        }
        None => false,
    }
}

/// TERM first, KILL after `grace`. Returns true if the group was alive.
#[cfg(unix)]
fn kill_process_group(pgid: i32, grace: Duration) -> bool {
    if !process_group_alive(pgid) {
        return false;
    }
    signal_group(pgid, libc::SIGTERM);
    let deadline = Instant::now() + grace;
    while Instant::now() < deadline {
        if !process_group_alive(pgid) {
            return true;
        }
        thread::sleep(TERMINATE_POLL_INTERVAL);
    }
    signal_group(pgid, libc::SIGKILL);
    true
}

#[cfg(not(unix))]
fn kill_process_group(_pgid: i32, _grace: Duration) -> bool {
    false
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    fn command(dir: &Path, program: PathBuf) -> CaptureCommand {
        CaptureCommand {
            job_id: JobId::new(),
            program,
            args: vec!["-mode".into(), "manual".into()],
            working_dir: dir.to_path_buf(),
            log_dir: Some(dir.join("logs")),
        }
    }

    fn wait_exit(handle: &mut Box<dyn CaptureHandle>) -> i32 {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            if let Some(code) = handle.try_wait().unwrap() {
                return code;
            }
            assert!(Instant::now() < deadline, "process did not exit");
            thread::sleep(Duration::from_millis(20));
        }
    }

    #[test]
    fn missing_binary_is_reported() {
        let temp = TempDir::new().unwrap();
        let cmd = command(temp.path(), temp.path().join("nope"));
        let err = CommandLauncher::new().launch(&cmd).err().unwrap();
        assert!(matches!(err, SpawnError::MissingBinary { .. }));

        let cmd = command(temp.path(), PathBuf::from("streamkeeper-no-such-recorder"));
        assert!(CommandLauncher::new().launch(&cmd).is_err());
    }

    #[test]
    fn exit_code_and_stderr_are_captured() {
        let temp = TempDir::new().unwrap();
        let program = script(temp.path(), "rec.sh", "echo out; echo 'room offline' >&2; exit 5");
        let cmd = command(temp.path(), program);

        let mut handle = CommandLauncher::new().launch(&cmd).unwrap();
        assert_eq!(wait_exit(&mut handle), 5);
        handle.reap_descendants();
        assert!(handle.stderr_tail().contains("room offline"));

        let log = std::fs::read_to_string(
            temp.path().join("logs").join(format!("{}.log", cmd.job_id)),
        )
        .unwrap();
        assert!(log.contains("out"));
    }

    /// Running (not exited, not a zombie) according to /proc.
    #[cfg(target_os = "linux")]
    fn running(pid: i32) -> bool {
        match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Ok(stat) => stat
                .rsplit(')')
                .next()
                .map(|rest| !rest.trim_start().starts_with('Z'))
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn terminate_kills_the_whole_group() {
        let temp = TempDir::new().unwrap();
        let pid_file = temp.path().join("child.pid");
        let program = script(
            temp.path(),
            "hang.sh",
            &format!("sleep 300 &\necho $! > {}\nwait", pid_file.display()),
        );
        let cmd = command(temp.path(), program);
        let mut handle = CommandLauncher::new().launch(&cmd).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        let grandchild: i32 = loop {
            let text = std::fs::read_to_string(&pid_file).unwrap_or_default();
            if let Ok(pid) = text.trim().parse() {
                break pid;
            }
            assert!(Instant::now() < deadline, "script never started its child");
            thread::sleep(Duration::from_millis(20));
        };
        assert!(running(grandchild));

        let code = handle.terminate(Duration::from_secs(2)).unwrap();
        assert!(code < 0 || code > 128, "unexpected exit code {code}");

        let deadline = Instant::now() + Duration::from_secs(2);
        while running(grandchild) {
            assert!(Instant::now() < deadline, "descendant survived termination");
            thread::sleep(Duration::from_millis(20));
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn identity_tells_a_reused_pid_apart() {
        use std::os::unix::process::CommandExt;

        let mut other = Command::new("sleep").arg("60").process_group(0).spawn().unwrap();
        let pid = other.id();
        let identity = process_identity(pid).unwrap();
        assert_eq!(process_identity(pid).as_deref(), Some(identity.as_str()));
        assert_ne!(process_identity(std::process::id()), Some(identity.clone()));

        let stale = format!("{}0", identity);
        assert!(!kill_orphaned_capture(pid as i32, &stale, Duration::from_millis(100)));
        assert!(other.try_wait().unwrap().is_none());

        assert!(kill_orphaned_capture(pid as i32, &identity, Duration::from_secs(2)));
        let status = other.wait().unwrap();
        assert!(!status.success());
    }

    #[test]
    fn signal_group_refuses_special_ids() {
        assert!(!signal_group(0, 0));
        assert!(!signal_group(1, 0));
        assert!(!signal_group(-5, 0));
    }
}
