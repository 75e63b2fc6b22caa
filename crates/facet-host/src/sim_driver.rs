//! [`SimDriver`] – in-process stub driver for tests and the CLI.
//!
//! Records every hook invocation without touching real hardware, so the
//! lifecycle orchestrator can be exercised end to end.
//!
//! | Hook | Stub behaviour |
//! |---|---|
//! | `probe`   | Succeeds unless [`SimDriver::fail_probe`] is set. |
//! | `remove`  | Counts the call. |
//! | `suspend` | Available only when built with [`SimDriver::with_suspend`]. |
//! | `resume`  | Available only when built with [`SimDriver::with_resume`]; fails while [`SimDriver::fail_resume`] is set. |

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use facet_types::FacetError;
use parking_lot::Mutex;

use crate::child::{ChildDevice, ChildDriver};

/// Stub driver that counts hook calls.
#[derive(Default)]
pub struct SimDriver {
    name: String,
    suspend: bool,
    resume: bool,
    fail_probe: AtomicBool,
    fail_resume: AtomicBool,
    probes: AtomicUsize,
    removes: AtomicUsize,
    suspends: AtomicUsize,
    resumes: AtomicUsize,
    journal: Mutex<Vec<String>>,
}

impl SimDriver {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Advertise a suspend hook.
    pub fn with_suspend(mut self) -> Self {
        self.suspend = true;
        self
    }

    /// Advertise a resume hook.
    pub fn with_resume(mut self) -> Self {
        self.resume = true;
        self
    }

    pub fn build(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn fail_probe(&self, fail: bool) {
        self.fail_probe.store(fail, Ordering::SeqCst);
    }

    pub fn fail_resume(&self, fail: bool) {
        self.fail_resume.store(fail, Ordering::SeqCst);
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn removes(&self) -> usize {
        self.removes.load(Ordering::SeqCst)
    }

    pub fn suspends(&self) -> usize {
        self.suspends.load(Ordering::SeqCst)
    }

    pub fn resumes(&self) -> usize {
        self.resumes.load(Ordering::SeqCst)
    }

    /// `"<hook> <child>"` lines in call order.
    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().clone()
    }

    fn record(&self, hook: &str, child: &ChildDevice) {
        self.journal.lock().push(format!("{hook} {}", child.name()));
    }
}

impl ChildDriver for SimDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn probe(&self, child: &ChildDevice) -> Result<(), FacetError> {
        if self.fail_probe.load(Ordering::SeqCst) {
            return Err(FacetError::ChildCreationFailed {
                child: child.name().to_string(),
                details: format!("{} probe rejected", self.name),
            });
        }
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.record("probe", child);
        Ok(())
    }

    fn remove(&self, child: &ChildDevice) {
        self.removes.fetch_add(1, Ordering::SeqCst);
        self.record("remove", child);
    }

    fn can_suspend(&self) -> bool {
        self.suspend
    }

    fn suspend(&self, child: &ChildDevice) {
        self.suspends.fetch_add(1, Ordering::SeqCst);
        self.record("suspend", child);
    }

    fn can_resume(&self) -> bool {
        self.resume
    }

    fn resume(&self, child: &ChildDevice) -> Result<(), FacetError> {
        if self.fail_resume.load(Ordering::SeqCst) {
            return Err(FacetError::ResumeFailed {
                child: child.name().to_string(),
                details: format!("{} resume rejected", self.name),
            });
        }
        self.resumes.fetch_add(1, Ordering::SeqCst);
        self.record("resume", child);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facet_types::FeatureId;

    fn child() -> Arc<ChildDevice> {
        ChildDevice::new("dev", FeatureId::Eth, 0, "facet_core.eth.0", Box::new(|_| {}))
    }

    #[test]
    fn hooks_are_opt_in() {
        let plain = SimDriver::new("plain").build();
        assert!(!plain.can_suspend());
        assert!(!plain.can_resume());

        let pm = SimDriver::new("pm").with_suspend().with_resume().build();
        assert!(pm.can_suspend());
        assert!(pm.can_resume());
    }

    #[test]
    fn journal_records_call_order() {
        let drv = SimDriver::new("facet_eth").with_suspend().with_resume().build();
        let c = child();
        drv.probe(&c).unwrap();
        drv.suspend(&c);
        drv.resume(&c).unwrap();
        drv.remove(&c);
        assert_eq!(
            drv.journal(),
            vec![
                "probe facet_core.eth.0",
                "suspend facet_core.eth.0",
                "resume facet_core.eth.0",
                "remove facet_core.eth.0",
            ]
        );
    }

    #[test]
    fn injected_failures() {
        let drv = SimDriver::new("facet_eth").with_resume().build();
        let c = child();
        drv.fail_probe(true);
        assert!(drv.probe(&c).is_err());
        assert_eq!(drv.probes(), 0);

        drv.fail_resume(true);
        assert!(matches!(drv.resume(&c), Err(FacetError::ResumeFailed { .. })));
        assert_eq!(drv.resumes(), 0);
    }
}
