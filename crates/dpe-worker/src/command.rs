//! Shell-command workload driver
//!
//! Layout of the workload directory:
//!
//! ```text
//! <dir>/prepare.pid   pid (= process group id) and start time of a live
//!                     prepare wrapper
//! <dir>/prepare.exit  exit status written when prepare finished
//! <dir>/prepare.log   stdout/stderr of prepare
//! <dir>/run.pid, run.exit, run.log   same for the benchmark run
//! ```
//!
//! Each phase runs under a small `sh` wrapper that records the command's
//! exit status. A wrapper killed by `stop()` leaves no exit file, so a
//! stopped run is halted rather than failed. A pid file next to an exit
//! file, or one whose process has a different start time, is stale and is
//! removed without signalling anything.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tracing::{debug, info, warn};

use dpe_core::{WorkloadDriver, WorkloadError, WorkloadOp, WorkloadOptions};

use crate::error::WorkerError;

/// Writes the exit status of `$1` to `$2` atomically.
const WRAPPER: &str = r#"sh -c "$1"; status=$?; echo "$status" > "$2.tmp" && mv "$2.tmp" "$2""#;

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const KILL_WAIT: Duration = Duration::from_secs(2);

/// Background phase of the workload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Prepare,
    Run,
}

impl Phase {
    fn name(self) -> &'static str {
        match self {
            Phase::Prepare => "prepare",
            Phase::Run => "run",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What to run and where
#[derive(Debug, Clone)]
pub struct WorkloadSpec {
    pub dir: PathBuf,
    pub unit: String,
    pub test_name: String,
    /// Data set loading; a missing command means nothing to prepare
    pub prepare: Option<String>,
    pub run: String,
    pub clean: Option<String>,
    pub options: WorkloadOptions,
    pub stop_grace: Duration,
}

/// Contents of a `.pid` file
#[derive(Debug, Clone, Copy)]
struct PidRecord {
    pid: Pid,
    /// Kernel start time of the process, when the host exposes it
    start: Option<u64>,
}

/// Workload driver backed by detached shell process groups
#[derive(Debug)]
pub struct CommandWorkload {
    spec: WorkloadSpec,
    /// Children spawned by this process, kept so they can be reaped
    children: RefCell<HashMap<Phase, Child>>,
}

impl CommandWorkload {
    pub fn new(spec: WorkloadSpec) -> Self {
        Self {
            spec,
            children: RefCell::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.spec.dir
    }

    fn pid_path(&self, phase: Phase) -> PathBuf {
        self.spec.dir.join(format!("{}.pid", phase.name()))
    }

    fn exit_path(&self, phase: Phase) -> PathBuf {
        self.spec.dir.join(format!("{}.exit", phase.name()))
    }

    fn log_path(&self, phase: Phase) -> PathBuf {
        self.spec.dir.join(format!("{}.log", phase.name()))
    }

    fn read_pid(&self, phase: Phase) -> Result<Option<PidRecord>, WorkerError> {
        let path = self.pid_path(phase);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut fields = contents.split_whitespace();
        let pid = fields
            .next()
            .and_then(|raw| raw.parse::<i32>().ok())
            .filter(|raw| *raw > 0)
            .ok_or_else(|| WorkerError::BadPidFile(path.clone()))?;
        let start = match fields.next() {
            Some(raw) => Some(raw.parse().map_err(|_| WorkerError::BadPidFile(path))?),
            None => None,
        };
        Ok(Some(PidRecord {
            pid: Pid::from_raw(pid),
            start,
        }))
    }

    /// Pid of a phase that may still be running. Stale pid files are
    /// removed on the way.
    fn live_pid(&self, phase: Phase) -> Result<Option<Pid>, WorkerError> {
        let record = match self.read_pid(phase) {
            Ok(Some(record)) => record,
            Ok(None) => return Ok(None),
            Err(WorkerError::BadPidFile(path)) => {
                warn!(phase = %phase, path = %path.display(), "removing corrupt pid file");
                remove_if_exists(&path)?;
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let finished = self.exit_path(phase).exists();
        let reused = match (record.start, start_time(record.pid)) {
            (Some(recorded), Some(current)) => recorded != current,
            _ => false,
        };
        if !finished && !reused {
            return Ok(Some(record.pid));
        }

        debug!(
            phase = %phase,
            pid = record.pid.as_raw(),
            finished,
            reused,
            "discarding stale pid file"
        );
        if let Some(child) = self.children.borrow_mut().get_mut(&phase) {
            let _ = child.try_wait();
        }
        remove_if_exists(&self.pid_path(phase))?;
        Ok(None)
    }

    /// Exit status recorded by the wrapper, `None` while running or if
    /// the phase never completed.
    fn read_exit(&self, phase: Phase) -> Option<i32> {
        let contents = fs::read_to_string(self.exit_path(phase)).ok()?;
        match contents.trim().parse() {
            Ok(code) => Some(code),
            Err(_) => {
                warn!(phase = %phase, value = contents.trim(), "unreadable exit status");
                Some(-1)
            }
        }
    }

    fn alive(&self, phase: Phase) -> bool {
        match self.live_pid(phase) {
            Ok(Some(pid)) => self.leader_alive(pid, phase),
            Ok(None) => false,
            Err(e) => {
                warn!(phase = %phase, error = %e, "ignoring pid file");
                false
            }
        }
    }

    /// Liveness of the wrapper shell leading the phase's process group.
    fn leader_alive(&self, pid: Pid, phase: Phase) -> bool {
        // Reap our own children first so zombies do not look alive.
        if let Some(child) = self.children.borrow_mut().get_mut(&phase) {
            if let Ok(Some(_)) = child.try_wait() {
                return false;
            }
        }

        match signal::kill(pid, None) {
            Ok(()) => !is_zombie(pid),
            Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }

    fn spawn(&self, phase: Phase, command: &str) -> Result<(), WorkerError> {
        fs::create_dir_all(&self.spec.dir)?;

        let exit_path = self.exit_path(phase);
        remove_if_exists(&exit_path)?;

        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path(phase))?;

        let mut wrapper = Command::new("sh");
        wrapper
            .arg("-c")
            .arg(WRAPPER)
            .arg("dpe-bench")
            .arg(command)
            .arg(&exit_path)
            .current_dir(&self.spec.dir);
        self.apply_env(&mut wrapper, phase.name());

        let child = wrapper
            .stdin(Stdio::null())
            .stdout(log.try_clone()?)
            .stderr(log)
            .process_group(0)
            .spawn()
            .map_err(|source| WorkerError::Spawn {
                phase: phase.name(),
                source,
            })?;

        let pid = Pid::from_raw(child.id() as i32);
        let record = match start_time(pid) {
            Some(start) => format!("{} {}", pid, start),
            None => pid.to_string(),
        };
        fs::write(self.pid_path(phase), record)?;
        info!(phase = %phase, pid = child.id(), "workload phase started");
        self.children.borrow_mut().insert(phase, child);
        Ok(())
    }

    fn apply_env(&self, command: &mut Command, phase: &str) {
        command
            .env("DPE_BENCH_UNIT", &self.spec.unit)
            .env("DPE_BENCH_TEST_NAME", &self.spec.test_name)
            .env("DPE_BENCH_RUN_LABEL", run_label(&self.spec.test_name))
            .env("DPE_BENCH_PHASE", phase)
            .env("DPE_BENCH_WORKLOAD_DIR", &self.spec.dir)
            .envs(self.spec.options.env());
    }

    /// SIGTERM the phase's process group, escalating to SIGKILL after the
    /// grace period.
    fn terminate(&self, phase: Phase) -> Result<(), WorkerError> {
        let Some(pid) = self.live_pid(phase)? else {
            return Ok(());
        };

        if self.leader_alive(pid, phase) {
            debug!(phase = %phase, pid = pid.as_raw(), "sending SIGTERM");
            let _ = signal::killpg(pid, Signal::SIGTERM);

            if !self.wait_leader(pid, phase, self.spec.stop_grace) {
                warn!(phase = %phase, pid = pid.as_raw(), "grace period elapsed, sending SIGKILL");
                let _ = signal::killpg(pid, Signal::SIGKILL);
                if !self.wait_leader(pid, phase, KILL_WAIT) {
                    return Err(WorkerError::StillAlive { pid: pid.as_raw() });
                }
            }
        }
        // Stragglers that outlived the wrapper
        let _ = signal::killpg(pid, Signal::SIGKILL);

        if let Some(mut child) = self.children.borrow_mut().remove(&phase) {
            let _ = child.wait();
        }
        remove_if_exists(&self.pid_path(phase))?;
        info!(phase = %phase, "workload phase stopped");
        Ok(())
    }

    fn wait_leader(&self, pid: Pid, phase: Phase, timeout: Duration) -> bool {
        let start = Instant::now();
        loop {
            if !self.leader_alive(pid, phase) {
                return true;
            }
            if start.elapsed() >= timeout {
                return false;
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    fn stop_all(&self) -> Result<(), WorkerError> {
        self.terminate(Phase::Run)?;
        self.terminate(Phase::Prepare)
    }

    fn run_clean_command(&self, command: &str) -> Result<(), WorkerError> {
        let mut clean = Command::new("sh");
        clean.arg("-c").arg(command);
        self.apply_env(&mut clean, "clean");
        let status = clean
            .stdin(Stdio::null())
            .status()
            .map_err(|source| WorkerError::Spawn {
                phase: "clean",
                source,
            })?;
        if !status.success() {
            return Err(WorkerError::CleanFailed(status.to_string()));
        }
        Ok(())
    }
}

/// An exited process nobody reaped yet still answers signal 0.
fn is_zombie(pid: Pid) -> bool {
    let Ok(stat) = fs::read_to_string(format!("/proc/{}/stat", pid.as_raw())) else {
        return false;
    };
    // Field 3, after the parenthesised command name
    stat.rsplit_once(')')
        .and_then(|(_, rest)| rest.split_whitespace().next())
        .is_some_and(|state| state == "Z")
}

/// Start time in clock ticks since boot (field 22 of `/proc/<pid>/stat`).
fn start_time(pid: Pid) -> Option<u64> {
    let stat = fs::read_to_string(format!("/proc/{}/stat", pid.as_raw())).ok()?;
    let (_, rest) = stat.rsplit_once(')')?;
    // `rest` starts at field 3
    rest.split_whitespace().nth(19)?.parse().ok()
}

/// Test name with the time the phase started, e.g. `tpcc-1718000000`
fn run_label(test_name: &str) -> String {
    format!("{}-{}", test_name, chrono::Utc::now().timestamp())
}

fn remove_if_exists(path: &Path) -> Result<(), WorkerError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

impl WorkloadDriver for CommandWorkload {
    fn name(&self) -> &str {
        "command"
    }

    fn is_prepared(&self) -> bool {
        self.read_exit(Phase::Prepare) == Some(0)
    }

    fn is_running(&self) -> bool {
        self.read_exit(Phase::Run).is_none() && self.alive(Phase::Run)
    }

    fn is_stopped(&self) -> bool {
        !self.alive(Phase::Run) && !self.alive(Phase::Prepare)
    }

    fn is_failed(&self) -> bool {
        [Phase::Prepare, Phase::Run]
            .into_iter()
            .any(|phase| matches!(self.read_exit(phase), Some(code) if code != 0))
    }

    fn is_collecting(&self) -> bool {
        false
    }

    fn is_uploading(&self) -> bool {
        false
    }

    fn is_cleaned(&self) -> bool {
        match fs::read_dir(&self.spec.dir) {
            Ok(mut entries) => entries.next().is_none(),
            Err(_) => true,
        }
    }

    fn prepare(&mut self) -> Result<(), WorkloadError> {
        if self.alive(Phase::Prepare) {
            return Err(WorkloadError::InProgress("prepare already running".to_string()));
        }
        // A fresh data set invalidates every earlier result.
        self.terminate(Phase::Run)
            .map_err(|e| e.into_workload_error(WorkloadOp::Stop))?;
        for phase in [Phase::Run, Phase::Prepare] {
            remove_if_exists(&self.exit_path(phase))
                .map_err(|e| e.into_workload_error(WorkloadOp::Prepare))?;
        }
        let result = match self.spec.prepare.clone() {
            Some(command) => self.spawn(Phase::Prepare, &command),
            None => fs::create_dir_all(&self.spec.dir)
                .and_then(|()| fs::write(self.exit_path(Phase::Prepare), "0\n"))
                .map_err(WorkerError::from),
        };
        result.map_err(|e| e.into_workload_error(WorkloadOp::Prepare))
    }

    fn start(&mut self) -> Result<(), WorkloadError> {
        self.terminate(Phase::Run)
            .map_err(|e| e.into_workload_error(WorkloadOp::Stop))?;
        let command = self.spec.run.clone();
        self.spawn(Phase::Run, &command)
            .map_err(|e| e.into_workload_error(WorkloadOp::Start))
    }

    fn stop(&mut self) -> Result<(), WorkloadError> {
        self.stop_all()
            .map_err(|e| e.into_workload_error(WorkloadOp::Stop))
    }

    fn clean(&mut self) -> Result<(), WorkloadError> {
        self.stop_all()
            .map_err(|e| e.into_workload_error(WorkloadOp::Stop))?;
        if let Some(command) = self.spec.clean.clone() {
            self.run_clean_command(&command)
                .map_err(|e| e.into_workload_error(WorkloadOp::Clean))?;
        }
        match fs::remove_dir_all(&self.spec.dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(WorkloadError::Io(e)),
        }
    }
}

impl Drop for CommandWorkload {
    fn drop(&mut self) {
        // Detached groups keep running; only reap the ones already done.
        for child in self.children.get_mut().values_mut() {
            let _ = child.try_wait();
        }
    }
}
