/// Balance threshold evaluation.
///
/// Classifies a single balance sample against the configured severity
/// ladder. This is the live-loop counterpart of the batch window detector
/// in `analysis::leak_events`: the daemon calls it on every fresh sample
/// so a burst pipe is reported within one cycle, without waiting for the
/// event window to close.

use crate::analysis::balance::BalanceSample;
use crate::model::{LeakKind, LeakThresholds};

/// Main-meter flow (L/s) above which silent branches count as a hidden
/// leak. Slightly above zero to ignore meter jitter.
pub const HIDDEN_LEAK_MIN_LPS: f64 = 0.02;

/// Severity ladder for balance alerts, ascending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LeakSeverity {
    /// Differential above the watch tier: worth logging, not yet worth
    /// waking anyone up.
    Watch,
    /// Differential above the alert tier, or any hidden-leak signature.
    Alert,
    /// Differential above the critical tier: burst-pipe territory.
    Critical,
}

impl LeakSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeakSeverity::Watch => "watch",
            LeakSeverity::Alert => "alert",
            LeakSeverity::Critical => "critical",
        }
    }
}

/// A live balance alert for one sample.
#[derive(Debug, Clone)]
pub struct BalanceAlert {
    pub severity: LeakSeverity,
    pub kind: LeakKind,
    pub diff_lps: f64,
    pub message: String,
}

/// Evaluates one balance sample against the severity ladder.
///
/// Returns `None` when the sample is within tolerance. A hidden-leak
/// signature (all branches idle, main meter flowing) is never reported
/// below `Alert`, whatever its magnitude.
pub fn check_flow_balance(
    sample: &BalanceSample,
    thresholds: &LeakThresholds,
) -> Option<BalanceAlert> {
    let hidden =
        sample.branch_total_lps == 0.0 && sample.main_lps > HIDDEN_LEAK_MIN_LPS;

    let tier = if sample.diff_lps >= thresholds.critical_lps {
        Some(LeakSeverity::Critical)
    } else if sample.diff_lps >= thresholds.alert_lps {
        Some(LeakSeverity::Alert)
    } else if sample.diff_lps >= thresholds.watch_lps {
        Some(LeakSeverity::Watch)
    } else {
        None
    };

    if hidden {
        let severity = tier.unwrap_or(LeakSeverity::Alert).max(LeakSeverity::Alert);
        return Some(BalanceAlert {
            severity,
            kind: LeakKind::HiddenLeak,
            diff_lps: sample.diff_lps,
            message: format!(
                "Hidden leak signature: main meter at {:.3} L/s with all branches idle",
                sample.main_lps
            ),
        });
    }

    tier.map(|severity| BalanceAlert {
        severity,
        kind: LeakKind::Mismatch,
        diff_lps: sample.diff_lps,
        message: format!(
            "Flow mismatch of {:.3} L/s between main meter ({:.3} L/s) and branch total ({:.3} L/s)",
            sample.diff_lps, sample.main_lps, sample.branch_total_lps
        ),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
