//! Error taxonomy and one-time suppression (spec §7).
//!
//! There are no thrown errors across the interrupt boundary; every anomaly funnels through here
//! instead of a `Result`. Grounded in `base::tracing_util`'s `permit_alloc`-wrapped macros (so
//! logging itself can't violate the no-alloc rule) plus `base::metrics_util::record_occurrence`
//! for the "this would repeat every block" case, which the teacher already uses for exactly this
//! shape of problem (cheap, allocation-free counters for hot-path anomalies).

use base::hash_util::NonCryptoHashSet;
use base::{metrics_util, tracing_debug, tracing_error, tracing_warn};

/// Matches spec §7's taxonomy by kind, not by Rust type: each variant names *why* something is
/// being logged, which determines its severity and the logging verb used.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Severity {
    /// Contract violations from callers, sync anomalies. Recovery clamps the offending quantity.
    Anomaly = 1,
    /// Transient structural warnings: jump landed past its primary event, overlapping jumps,
    /// latency loss.
    Transient = 2,
    /// Informational: mode changes, track switches, shifts.
    Informational = 3,
}

/// Logs one-time-per-site anomalies that would otherwise repeat every block (spec §7: "logged at
/// severity 1 with one-time suppression when the same anomaly would repeat every block"). `site`
/// should be a `&'static str` naming the call site, not the dynamic message.
pub struct Diagnostics {
    suppressed_sites: NonCryptoHashSet<&'static str>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self {
            suppressed_sites: NonCryptoHashSet::default(),
        }
    }

    /// Reports an anomaly, suppressing all but the first occurrence at `site` until
    /// [`Self::reset_site`] is called (typically when the condition that caused it clears).
    pub fn report_once(&mut self, site: &'static str, severity: Severity, message: &str) {
        if self.suppressed_sites.contains(site) {
            metrics_util::record_occurrence("diagnostics_suppressed");
            return;
        }
        self.suppressed_sites.insert(site);
        self.emit(severity, site, message);
    }

    pub fn reset_site(&mut self, site: &'static str) {
        self.suppressed_sites.remove(site);
    }

    /// Reports without suppression, for anomalies that are inherently one-shot (a single failed
    /// function invocation, not a per-block recurring condition).
    pub fn report(&self, severity: Severity, site: &'static str, message: &str) {
        self.emit(severity, site, message);
    }

    fn emit(&self, severity: Severity, site: &'static str, message: &str) {
        match severity {
            Severity::Anomaly => tracing_warn!(site, "{message}"),
            Severity::Transient => tracing_warn!(site, "{message}"),
            Severity::Informational => tracing_debug!(site, "{message}"),
        }
    }

    /// Unrecoverable internal invariants (spec §7: "null required field") get the anomaly log
    /// plus silent substitution by the caller; this just records that it happened.
    pub fn report_invariant_violation(&self, site: &'static str, message: &str) {
        tracing_error!(site, "{message}");
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_report_at_same_site_is_suppressed_until_reset() {
        let mut d = Diagnostics::new();
        d.report_once("test.site", Severity::Anomaly, "first");
        assert!(d.suppressed_sites.contains("test.site"));
        d.report_once("test.site", Severity::Anomaly, "second");
        assert_eq!(d.suppressed_sites.len(), 1);
        d.reset_site("test.site");
        assert!(!d.suppressed_sites.contains("test.site"));
    }

    #[test]
    fn distinct_sites_are_independent() {
        let mut d = Diagnostics::new();
        d.report_once("a", Severity::Transient, "x");
        d.report_once("b", Severity::Transient, "y");
        assert_eq!(d.suppressed_sites.len(), 2);
    }
}
