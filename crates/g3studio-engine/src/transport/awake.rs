use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};

/// Best-effort hint that keeps the host from idling while a request is in flight.
/// `acquire` is a no-op while already held.
pub trait KeepAwake: Send + Sync {
    fn acquire(&self) -> Result<()>;
    fn release(&self) -> Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopKeepAwake;

impl KeepAwake for NoopKeepAwake {
    fn acquire(&self) -> Result<()> {
        Ok(())
    }

    fn release(&self) -> Result<()> {
        Ok(())
    }
}

/// Holds an inhibitor child process (`systemd-inhibit` or `caffeinate`) for as
/// long as the hint is acquired.
#[derive(Debug)]
pub struct ProcessKeepAwake {
    program: String,
    args: Vec<String>,
    child: Mutex<Option<Child>>,
}

impl ProcessKeepAwake {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            child: Mutex::new(None),
        }
    }

    /// The platform inhibitor, or `None` where there is nothing to spawn.
    pub fn platform() -> Option<Self> {
        if cfg!(target_os = "macos") {
            return Some(Self::new("caffeinate", vec!["-i".to_string()]));
        }
        if cfg!(target_os = "linux") {
            return Some(Self::new(
                "systemd-inhibit",
                [
                    "--what=idle:sleep",
                    "--who=g3studio",
                    "--why=generateContent request in flight",
                    "--mode=block",
                    "sleep",
                    "infinity",
                ]
                .iter()
                .map(|arg| arg.to_string())
                .collect(),
            ));
        }
        None
    }

    pub fn is_held(&self) -> bool {
        self.child
            .lock()
            .map(|child| child.is_some())
            .unwrap_or(false)
    }
}

impl KeepAwake for ProcessKeepAwake {
    fn acquire(&self) -> Result<()> {
        let mut slot = self
            .child
            .lock()
            .map_err(|_| anyhow!("keep-awake lock poisoned"))?;
        if let Some(child) = slot.as_mut() {
            if child.try_wait()?.is_none() {
                return Ok(());
            }
        }
        let child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to spawn {}", self.program))?;
        *slot = Some(child);
        Ok(())
    }

    fn release(&self) -> Result<()> {
        let taken = self
            .child
            .lock()
            .map_err(|_| anyhow!("keep-awake lock poisoned"))?
            .take();
        if let Some(mut child) = taken {
            if child.try_wait()?.is_none() {
                child
                    .kill()
                    .with_context(|| format!("failed to stop {}", self.program))?;
            }
            child.wait()?;
        }
        Ok(())
    }
}

impl Drop for ProcessKeepAwake {
    fn drop(&mut self) {
        let _ = self.release();
    }
}

/// Shared handle through which the host reports hidden/visible transitions.
///
/// A transition to hidden while a request is in flight (or a host that is
/// already hidden when the request starts) arms the single background retry.
/// Becoming visible mid-flight re-acquires the keep-awake hint.
#[derive(Clone)]
pub struct VisibilitySignal {
    shared: Arc<VisibilityShared>,
}

struct VisibilityShared {
    in_flight: AtomicBool,
    hidden: AtomicBool,
    hidden_during_request: AtomicBool,
    keep_awake: Arc<dyn KeepAwake>,
}

impl VisibilitySignal {
    pub fn new(keep_awake: Arc<dyn KeepAwake>) -> Self {
        Self {
            shared: Arc::new(VisibilityShared {
                in_flight: AtomicBool::new(false),
                hidden: AtomicBool::new(false),
                hidden_during_request: AtomicBool::new(false),
                keep_awake,
            }),
        }
    }

    pub fn mark_hidden(&self) {
        self.shared.hidden.store(true, Ordering::SeqCst);
        if self.shared.in_flight.load(Ordering::SeqCst) {
            self.shared
                .hidden_during_request
                .store(true, Ordering::SeqCst);
        }
    }

    pub fn mark_visible(&self) {
        self.shared.hidden.store(false, Ordering::SeqCst);
        if self.shared.in_flight.load(Ordering::SeqCst) {
            self.acquire_keep_awake();
        }
    }

    pub fn is_hidden(&self) -> bool {
        self.shared.hidden.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> bool {
        self.shared.in_flight.load(Ordering::SeqCst)
    }

    pub fn hidden_during_request(&self) -> bool {
        self.shared.hidden_during_request.load(Ordering::SeqCst)
    }

    pub(crate) fn begin(&self) {
        self.shared
            .hidden_during_request
            .store(self.is_hidden(), Ordering::SeqCst);
        self.shared.in_flight.store(true, Ordering::SeqCst);
    }

    pub(crate) fn finish(&self) {
        self.shared.in_flight.store(false, Ordering::SeqCst);
        self.shared
            .hidden_during_request
            .store(false, Ordering::SeqCst);
        if let Err(err) = self.shared.keep_awake.release() {
            tracing::debug!("keep-awake release failed: {err:#}");
        }
    }

    pub(crate) fn acquire_keep_awake(&self) {
        if let Err(err) = self.shared.keep_awake.acquire() {
            tracing::debug!("keep-awake acquire failed: {err:#}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[derive(Default)]
    struct CountingKeepAwake {
        acquired: AtomicUsize,
        released: AtomicUsize,
    }

    impl KeepAwake for CountingKeepAwake {
        fn acquire(&self) -> Result<()> {
            self.acquired.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn release(&self) -> Result<()> {
            self.released.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn hidden_only_latches_while_in_flight() {
        let signal = VisibilitySignal::new(Arc::new(NoopKeepAwake));
        signal.mark_hidden();
        signal.mark_visible();
        signal.begin();
        assert!(!signal.hidden_during_request());
        signal.mark_hidden();
        signal.mark_visible();
        assert!(signal.hidden_during_request());
        signal.finish();
        assert!(!signal.hidden_during_request());
        assert!(!signal.in_flight());
    }

    #[test]
    fn already_hidden_host_arms_on_begin() {
        let signal = VisibilitySignal::new(Arc::new(NoopKeepAwake));
        signal.mark_hidden();
        signal.begin();
        assert!(signal.hidden_during_request());
    }

    #[test]
    fn visible_mid_flight_reacquires() {
        let counter = Arc::new(CountingKeepAwake::default());
        let signal = VisibilitySignal::new(counter.clone());
        signal.mark_visible();
        assert_eq!(counter.acquired.load(Ordering::SeqCst), 0);
        signal.begin();
        signal.mark_visible();
        assert_eq!(counter.acquired.load(Ordering::SeqCst), 1);
        signal.finish();
        assert_eq!(counter.released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn missing_inhibitor_program_is_an_error_not_a_panic() {
        let keep_awake = ProcessKeepAwake::new("g3studio-no-such-inhibitor", Vec::new());
        assert!(keep_awake.acquire().is_err());
        assert!(!keep_awake.is_held());
        assert!(keep_awake.release().is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn process_hint_is_held_until_release() -> anyhow::Result<()> {
        let keep_awake = ProcessKeepAwake::new("sleep", vec!["30".to_string()]);
        keep_awake.acquire()?;
        keep_awake.acquire()?;
        assert!(keep_awake.is_held());
        keep_awake.release()?;
        assert!(!keep_awake.is_held());
        Ok(())
    }
}
