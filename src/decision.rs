//! Refresh decision engine.
//!
//! Classifies a snapshot of the device's condition into the action the
//! wake cycle should take. Evaluation is pure: no I/O, no clocks, no state.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Raw signal readings as sampled from the hardware.
///
/// `None` means the signal could not be read this pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawSignals {
    pub data_ready: Option<bool>,
    pub power_present: Option<bool>,
}

/// Immutable view of the device taken at the start of a wake pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ContextSnapshot {
    data_ready: bool,
    power_present: bool,
    prior_decision: i32,
}

impl ContextSnapshot {
    /// Create a snapshot from already-resolved flags
    pub const fn new(data_ready: bool, power_present: bool, prior_decision: i32) -> Self {
        Self {
            data_ready,
            power_present,
            prior_decision,
        }
    }

    /// Build a snapshot from raw signals.
    ///
    /// An unavailable signal reads as `false`: missing data means there is
    /// nothing to draw yet, and an unknown charger is treated as battery.
    pub fn from_signals(signals: RawSignals, prior_decision: i32) -> Self {
        if signals.data_ready.is_none() {
            tracing::debug!("Data-ready signal unavailable, treating as not ready");
        }
        if signals.power_present.is_none() {
            tracing::debug!("Power signal unavailable, treating as battery");
        }

        Self::new(
            signals.data_ready.unwrap_or(false),
            signals.power_present.unwrap_or(false),
            prior_decision,
        )
    }

    pub fn data_ready(&self) -> bool {
        self.data_ready
    }

    pub fn power_present(&self) -> bool {
        self.power_present
    }

    /// Code retained from the previous pass. Diagnostic only.
    pub fn prior_decision(&self) -> i32 {
        self.prior_decision
    }
}

/// Outcome of one evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    /// Data not ready; pause briefly and evaluate again
    WaitForData,
    /// External power present; refresh and keep the loop alive
    StayAwake,
    /// On battery with data ready; refresh once and sleep
    DeepSleep,
}

impl Action {
    /// All actions in code order
    pub fn all() -> &'static [Action] {
        &[Action::DeepSleep, Action::WaitForData, Action::StayAwake]
    }

    /// Stable integer written to retained storage
    pub const fn code(self) -> i32 {
        match self {
            Action::DeepSleep => 0,
            Action::WaitForData => 1,
            Action::StayAwake => 2,
        }
    }

    /// Decode a retained integer. Unknown codes yield `None`.
    pub fn from_code(code: i32) -> Option<Self> {
        Action::all().iter().copied().find(|a| a.code() == code)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::WaitForData => "WAIT_FOR_DATA",
            Action::StayAwake => "STAY_AWAKE",
            Action::DeepSleep => "DEEP_SLEEP",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decide what the wake cycle should do next.
///
/// First match wins:
/// 1. no data yet -> [`Action::WaitForData`]
/// 2. external power -> [`Action::StayAwake`]
/// 3. otherwise -> [`Action::DeepSleep`]
pub fn decide(snapshot: ContextSnapshot) -> Action {
    if !snapshot.data_ready() {
        return Action::WaitForData;
    }
    if snapshot.power_present() {
        return Action::StayAwake;
    }
    Action::DeepSleep
}
