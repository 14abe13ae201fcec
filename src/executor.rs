//! Capabilities the engine consumes from the platform.
//!
//! The engine never synthesizes input itself. It calls a [`ClickExecutor`]
//! once per tick and treats it as a black box with bounded latency, and it
//! optionally asks a [`PermissionCheck`] before starting a session.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::config::{ClickKind, Point};

/// Why a single click attempt failed.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClickErrorKind {
    #[error("input permission denied")]
    PermissionDenied,
    #[error("target process unavailable")]
    TargetUnavailable,
    #[error("event injection failed")]
    InjectionFailed,
    #[error("click timed out")]
    Timeout,
    #[error("click aborted")]
    Aborted,
    #[error("click kind not supported")]
    Unsupported,
}

/// Result of one click attempt.
pub type ClickOutcome = std::result::Result<(), ClickErrorKind>;

/// The process a session aims its clicks at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetProcess {
    pub name: String,
    pub pid: Option<u32>,
}

impl TargetProcess {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pid: None,
        }
    }

    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }
}

/// Synthesizes pointer clicks.
pub trait ClickExecutor: Send + Sync + 'static {
    fn perform_click(
        &self,
        location: Point,
        kind: ClickKind,
        target: Option<&TargetProcess>,
    ) -> ClickOutcome;

    /// Called from the emergency-stop path; must not block.
    fn abort(&self) {}

    /// Called when a new session starts, undoing a previous [`abort`](Self::abort).
    fn rearm(&self) {}

    /// Live pointer position, when the platform can report it.
    fn current_location(&self) -> Option<Point> {
        None
    }
}

impl<E: ClickExecutor + ?Sized> ClickExecutor for Arc<E> {
    fn perform_click(
        &self,
        location: Point,
        kind: ClickKind,
        target: Option<&TargetProcess>,
    ) -> ClickOutcome {
        (**self).perform_click(location, kind, target)
    }

    fn abort(&self) {
        (**self).abort()
    }

    fn rearm(&self) {
        (**self).rearm()
    }

    fn current_location(&self) -> Option<Point> {
        (**self).current_location()
    }
}

/// Whether the process may inject input. Not retried by the engine.
pub trait PermissionCheck: Send + Sync + 'static {
    fn is_authorized(&self) -> bool;
}

impl<F> PermissionCheck for F
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    fn is_authorized(&self) -> bool {
        self()
    }
}

/// Logs clicks instead of performing them.
#[derive(Debug, Default)]
pub struct DryRunClickExecutor {
    clicks: AtomicU64,
    aborted: AtomicBool,
}

impl DryRunClickExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clicks(&self) -> u64 {
        self.clicks.load(Ordering::Relaxed)
    }
}

impl ClickExecutor for DryRunClickExecutor {
    fn perform_click(
        &self,
        location: Point,
        kind: ClickKind,
        target: Option<&TargetProcess>,
    ) -> ClickOutcome {
        if self.aborted.load(Ordering::Acquire) {
            return Err(ClickErrorKind::Aborted);
        }
        let count = self.clicks.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            count,
            %location,
            %kind,
            target = target.map(|t| t.name.as_str()).unwrap_or("-"),
            "dry-run click"
        );
        Ok(())
    }

    fn abort(&self) {
        self.aborted.store(true, Ordering::Release);
    }

    fn rearm(&self) {
        self.aborted.store(false, Ordering::Release);
    }
}

#[cfg(windows)]
pub use self::windows::SendInputClickExecutor;

#[cfg(windows)]
mod windows {
    use std::mem;
    use std::sync::atomic::{AtomicBool, Ordering};

    use tracing::debug;
    use winapi::shared::windef::POINT;
    use winapi::um::winuser::{
        GetCursorPos, SendInput, SetCursorPos, INPUT, INPUT_MOUSE, MOUSEEVENTF_LEFTDOWN,
        MOUSEEVENTF_LEFTUP, MOUSEEVENTF_MIDDLEDOWN, MOUSEEVENTF_MIDDLEUP, MOUSEEVENTF_RIGHTDOWN,
        MOUSEEVENTF_RIGHTUP, MOUSEINPUT,
    };

    use super::{ClickErrorKind, ClickExecutor, ClickOutcome, TargetProcess};
    use crate::config::{ClickKind, Point};

    /// Clicks through `SetCursorPos` + `SendInput`.
    #[derive(Debug, Default)]
    pub struct SendInputClickExecutor {
        aborted: AtomicBool,
    }

    impl SendInputClickExecutor {
        pub fn new() -> Self {
            Self::default()
        }
    }

    fn mouse_input(flags: u32) -> INPUT {
        // SAFETY: INPUT is a plain C struct for which all-zero is a valid value.
        let mut input: INPUT = unsafe { mem::zeroed() };
        input.type_ = INPUT_MOUSE;
        // SAFETY: the union is tagged INPUT_MOUSE above.
        unsafe {
            *input.u.mi_mut() = MOUSEINPUT {
                dx: 0,
                dy: 0,
                mouseData: 0,
                dwFlags: flags,
                time: 0,
                dwExtraInfo: 0,
            };
        }
        input
    }

    impl ClickExecutor for SendInputClickExecutor {
        fn perform_click(
            &self,
            location: Point,
            kind: ClickKind,
            target: Option<&TargetProcess>,
        ) -> ClickOutcome {
            if self.aborted.load(Ordering::Acquire) {
                return Err(ClickErrorKind::Aborted);
            }

            let (down, up, repeats) = match kind {
                ClickKind::Left => (MOUSEEVENTF_LEFTDOWN, MOUSEEVENTF_LEFTUP, 1),
                ClickKind::Right => (MOUSEEVENTF_RIGHTDOWN, MOUSEEVENTF_RIGHTUP, 1),
                ClickKind::Middle => (MOUSEEVENTF_MIDDLEDOWN, MOUSEEVENTF_MIDDLEUP, 1),
                ClickKind::Double => (MOUSEEVENTF_LEFTDOWN, MOUSEEVENTF_LEFTUP, 2),
            };

            // SAFETY: plain Win32 call with value arguments.
            if unsafe { SetCursorPos(location.x.round() as i32, location.y.round() as i32) } == 0 {
                return Err(ClickErrorKind::InjectionFailed);
            }

            let mut inputs: Vec<INPUT> = (0..repeats)
                .flat_map(|_| [mouse_input(down), mouse_input(up)])
                .collect();
            // SAFETY: `inputs` is a live, correctly sized buffer of INPUT values.
            let sent = unsafe {
                SendInput(
                    inputs.len() as u32,
                    inputs.as_mut_ptr(),
                    mem::size_of::<INPUT>() as i32,
                )
            };

            debug!(
                %location,
                %kind,
                target = target.map(|t| t.name.as_str()).unwrap_or("-"),
                sent,
                "SendInput click"
            );

            if sent as usize == inputs.len() {
                Ok(())
            } else {
                Err(ClickErrorKind::InjectionFailed)
            }
        }

        fn abort(&self) {
            self.aborted.store(true, Ordering::Release);
        }

        fn rearm(&self) {
            self.aborted.store(false, Ordering::Release);
        }

        fn current_location(&self) -> Option<Point> {
            let mut point = POINT { x: 0, y: 0 };
            // SAFETY: `point` is a valid out-pointer for the duration of the call.
            if unsafe { GetCursorPos(&mut point) } == 0 {
                None
            } else {
                Some(Point::new(point.x as f64, point.y as f64))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dry_run_counts_until_aborted() {
        let executor = DryRunClickExecutor::new();
        let target = TargetProcess::new("notepad.exe").with_pid(42);
        assert!(executor
            .perform_click(Point::new(1.0, 2.0), ClickKind::Left, Some(&target))
            .is_ok());
        assert_eq!(executor.clicks(), 1);

        executor.abort();
        assert_eq!(
            executor.perform_click(Point::new(1.0, 2.0), ClickKind::Left, None),
            Err(ClickErrorKind::Aborted)
        );

        executor.rearm();
        assert!(executor
            .perform_click(Point::new(1.0, 2.0), ClickKind::Right, None)
            .is_ok());
        assert_eq!(executor.clicks(), 2);
    }

    #[test]
    fn closures_are_permission_checks() {
        let granted = || true;
        let denied = || false;
        assert!(granted.is_authorized());
        assert!(!denied.is_authorized());
    }

    #[test]
    fn error_kinds_display() {
        assert_eq!(ClickErrorKind::Timeout.to_string(), "click timed out");
        assert_eq!(
            ClickErrorKind::TargetUnavailable.to_string(),
            "target process unavailable"
        );
    }
}
