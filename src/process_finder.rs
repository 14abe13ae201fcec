//! Target process discovery.
//!
//! Resolves the `target_process` hint of a session to a running process and
//! keeps watching that process while clicks are being sent to it.

use std::sync::Mutex;

use anyhow::Result;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::{debug, warn};

use crate::config::{ClickKind, Point};
use crate::executor::{ClickErrorKind, ClickExecutor, ClickOutcome, TargetProcess};

/// Finds processes by name using `sysinfo`.
///
/// # Example
///
/// ```no_run
/// use cadence_clicker::ProcessFinder;
///
/// let mut finder = ProcessFinder::new();
/// match finder.resolve("notepad") {
///     Ok(Some(target)) => println!("Found {} with PID {:?}", target.name, target.pid),
///     Ok(None) => println!("Process not found"),
///     Err(e) => eprintln!("Error: {}", e),
/// }
/// ```
pub struct ProcessFinder {
    system: System,
}

impl Clone for ProcessFinder {
    fn clone(&self) -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl Default for ProcessFinder {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessFinder {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }

    /// Returns the first process whose name contains `process_name`, case-insensitively.
    pub fn resolve(&mut self, process_name: &str) -> Result<Option<TargetProcess>> {
        let needle = process_name.trim().to_lowercase();
        if needle.is_empty() {
            anyhow::bail!("process name cannot be empty");
        }

        self.system.refresh_processes(ProcessesToUpdate::All, true);

        let found = self
            .system
            .processes()
            .iter()
            .map(|(pid, process)| (pid.as_u32(), process.name().to_string_lossy().into_owned()))
            .filter(|(_, name)| name.to_lowercase().contains(&needle))
            .min_by_key(|(pid, _)| *pid);

        Ok(found.map(|(pid, name)| {
            debug!(pid, %name, "resolved target process");
            TargetProcess::new(name).with_pid(pid)
        }))
    }

    /// Whether the process with `pid` is still alive.
    pub fn is_running(&mut self, pid: u32) -> bool {
        let pid = Pid::from_u32(pid);
        self.system
            .refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        self.system.process(pid).is_some()
    }
}

/// Wraps an executor and refuses to click once the target process has exited.
///
/// The check runs every `check_every` clicks so the per-tick cost stays low.
pub struct TargetGuard<E> {
    inner: E,
    finder: Mutex<GuardState>,
    check_every: u64,
}

struct GuardState {
    finder: ProcessFinder,
    clicks: u64,
    alive: bool,
}

impl<E: ClickExecutor> TargetGuard<E> {
    pub fn new(inner: E, check_every: u64) -> Self {
        Self {
            inner,
            finder: Mutex::new(GuardState {
                finder: ProcessFinder::new(),
                clicks: 0,
                alive: true,
            }),
            check_every: check_every.max(1),
        }
    }

    fn target_alive(&self, target: Option<&TargetProcess>) -> bool {
        let Some(pid) = target.and_then(|t| t.pid) else {
            return true;
        };
        let mut state = self
            .finder
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if state.clicks % self.check_every == 0 {
            state.alive = state.finder.is_running(pid);
            if !state.alive {
                warn!(pid, "target process is gone");
            }
        }
        state.clicks += 1;
        state.alive
    }
}

impl<E: ClickExecutor> ClickExecutor for TargetGuard<E> {
    fn perform_click(
        &self,
        location: Point,
        kind: ClickKind,
        target: Option<&TargetProcess>,
    ) -> ClickOutcome {
        if !self.target_alive(target) {
            return Err(ClickErrorKind::TargetUnavailable);
        }
        self.inner.perform_click(location, kind, target)
    }

    fn abort(&self) {
        self.inner.abort()
    }

    fn rearm(&self) {
        self.inner.rearm()
    }

    fn current_location(&self) -> Option<Point> {
        self.inner.current_location()
    }
}
