//! Wake-cycle orchestrator.
//!
//! One call to [`WakeCycle::run_cycle`] covers a device wake: sample the
//! signals, decide, persist the decision code, and act on it. Waiting for data
//! and staying awake on external power loop back to a fresh sample; deep sleep
//! ends the cycle.
//!
//! ```text
//! Entry -> WAIT_FOR_DATA -> delay(retry) -> Entry
//!       -> STAY_AWAKE    -> refresh -> delay(2 min) -> Entry
//!       -> DEEP_SLEEP    -> refresh -> delay(15 s settle) -> sleep entry
//! ```

use crate::config::TimingConfig;
use crate::decision::{decide, Action, ContextSnapshot, RawSignals};
use crate::host::HostError;
use crate::retained::RetainedStore;
use std::time::Duration;

/// Samples the data-ready and external-power signals
pub trait SignalSource {
    fn sample(&mut self) -> RawSignals;
}

/// Pushes the latest rendered content to the panel
pub trait DisplayRefresher {
    async fn refresh(&mut self) -> Result<(), HostError>;
}

/// Cooperative wall-clock suspension
pub trait Delay {
    async fn delay(&mut self, duration: Duration);
}

/// Suspends the whole device until the next wake
pub trait SleepEntry {
    async fn enter_deep_sleep(&mut self) -> Result<(), HostError>;
}

/// [`Delay`] backed by the tokio timer
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioDelay;

impl Delay for TokioDelay {
    async fn delay(&mut self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Delays used by the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleTiming {
    /// Pause before re-checking for data
    pub wait_retry: Duration,
    /// Consecutive re-checks allowed before giving up on data
    pub max_wait_retries: u32,
    /// Interval between refreshes on external power
    pub stay_awake: Duration,
    /// Pause between the final refresh and sleep entry
    pub settle: Duration,
}

impl Default for CycleTiming {
    fn default() -> Self {
        Self::from(&TimingConfig::default())
    }
}

impl From<&TimingConfig> for CycleTiming {
    fn from(config: &TimingConfig) -> Self {
        Self {
            wait_retry: config.wait_retry(),
            max_wait_retries: config.max_wait_retries,
            stay_awake: config.stay_awake(),
            settle: config.settle(),
        }
    }
}

/// How a cycle ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleEnd {
    /// Data was shown on battery, device put to sleep
    DeepSleep,
    /// Data never became ready within the retry budget, device put to sleep
    DataTimeout,
}

/// Summary of one wake cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    /// Entry passes taken, including the final one
    pub passes: u32,
    pub last_action: Action,
    pub end: CycleEnd,
    /// Whether the sleep-entry collaborator reported success
    pub slept: bool,
}

/// Drives wake cycles against a set of host collaborators
pub struct WakeCycle<S, R, D, P, T> {
    signals: S,
    refresher: R,
    delay: D,
    sleeper: P,
    store: T,
    timing: CycleTiming,
}

impl<S, R, D, P, T> WakeCycle<S, R, D, P, T>
where
    S: SignalSource,
    R: DisplayRefresher,
    D: Delay,
    P: SleepEntry,
    T: RetainedStore,
{
    pub fn new(
        signals: S,
        refresher: R,
        delay: D,
        sleeper: P,
        store: T,
        timing: CycleTiming,
    ) -> Self {
        Self {
            signals,
            refresher,
            delay,
            sleeper,
            store,
            timing,
        }
    }

    /// Access the retained store, e.g. to inspect it after a cycle
    pub fn store(&self) -> &T {
        &self.store
    }

    /// Run one wake cycle to its terminal sleep entry
    pub async fn run_cycle(&mut self) -> CycleReport {
        let mut passes = 0u32;
        let mut wait_retries = 0u32;

        loop {
            passes += 1;
            let action = self.entry(passes);

            match action {
                Action::WaitForData => {
                    if wait_retries >= self.timing.max_wait_retries {
                        tracing::warn!(
                            "No data after {} re-checks, sleeping without refresh",
                            wait_retries
                        );
                        let slept = self.settle_and_sleep().await;
                        return CycleReport {
                            passes,
                            last_action: action,
                            end: CycleEnd::DataTimeout,
                            slept,
                        };
                    }
                    wait_retries += 1;
                    tracing::debug!(
                        "Re-checking for data in {:?} ({}/{})",
                        self.timing.wait_retry,
                        wait_retries,
                        self.timing.max_wait_retries
                    );
                    self.delay.delay(self.timing.wait_retry).await;
                }
                Action::StayAwake => {
                    wait_retries = 0;
                    self.refresh().await;
                    tracing::debug!(
                        "On external power, next check in {:?}",
                        self.timing.stay_awake
                    );
                    self.delay.delay(self.timing.stay_awake).await;
                }
                Action::DeepSleep => {
                    self.refresh().await;
                    let slept = self.settle_and_sleep().await;
                    return CycleReport {
                        passes,
                        last_action: action,
                        end: CycleEnd::DeepSleep,
                        slept,
                    };
                }
            }
        }
    }

    /// Entry pass: snapshot, decide, persist
    fn entry(&mut self, pass: u32) -> Action {
        let prior = self.store.load();
        let snapshot = ContextSnapshot::from_signals(self.signals.sample(), prior);
        let action = decide(snapshot);

        tracing::info!(
            "Pass {}: data_ready={} power_present={} prior={} -> {}",
            pass,
            snapshot.data_ready(),
            snapshot.power_present(),
            snapshot.prior_decision(),
            action
        );

        if let Err(e) = self.store.store(action.code()) {
            tracing::error!("Failed to persist decision {}: {}", action, e);
        }

        action
    }

    async fn refresh(&mut self) {
        match self.refresher.refresh().await {
            Ok(()) => tracing::debug!("Display refreshed"),
            Err(e) => tracing::error!("Display refresh failed: {}", e),
        }
    }

    /// Settle delay followed by sleep entry; the delay is never skipped
    async fn settle_and_sleep(&mut self) -> bool {
        tracing::info!("Entering deep sleep in {:?}", self.timing.settle);
        self.delay.delay(self.timing.settle).await;

        match self.sleeper.enter_deep_sleep().await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Deep sleep entry failed: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retained::{MemoryRetainedStore, RetainedError};
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Event {
        Sample,
        Load,
        Store(i32),
        Refresh,
        Delay(Duration),
        Sleep,
    }

    type Log = Rc<RefCell<Vec<Event>>>;

    struct ScriptedSignals {
        log: Log,
        script: VecDeque<RawSignals>,
        fallback: RawSignals,
    }

    impl SignalSource for ScriptedSignals {
        fn sample(&mut self) -> RawSignals {
            self.log.borrow_mut().push(Event::Sample);
            self.script.pop_front().unwrap_or(self.fallback)
        }
    }

    struct FakeRefresher {
        log: Log,
        fail: bool,
    }

    impl DisplayRefresher for FakeRefresher {
        async fn refresh(&mut self) -> Result<(), HostError> {
            self.log.borrow_mut().push(Event::Refresh);
            if self.fail {
                return Err(HostError::CommandFailed {
                    program: "refresh".into(),
                    code: Some(1),
                });
            }
            Ok(())
        }
    }

    struct FakeDelay {
        log: Log,
    }

    impl Delay for FakeDelay {
        async fn delay(&mut self, duration: Duration) {
            self.log.borrow_mut().push(Event::Delay(duration));
        }
    }

    struct FakeSleep {
        log: Log,
        fail: bool,
    }

    impl SleepEntry for FakeSleep {
        async fn enter_deep_sleep(&mut self) -> Result<(), HostError> {
            self.log.borrow_mut().push(Event::Sleep);
            if self.fail {
                return Err(HostError::CommandFailed {
                    program: "rtcwake".into(),
                    code: Some(1),
                });
            }
            Ok(())
        }
    }

    struct LoggingStore {
        log: Log,
        inner: MemoryRetainedStore,
        fail: bool,
    }

    impl RetainedStore for LoggingStore {
        fn load(&mut self) -> i32 {
            self.log.borrow_mut().push(Event::Load);
            self.inner.load()
        }

        fn store(&mut self, code: i32) -> Result<(), RetainedError> {
            self.log.borrow_mut().push(Event::Store(code));
            if self.fail {
                return Err(RetainedError::Io(std::io::Error::other("read-only")));
            }
            self.inner.store(code)
        }
    }

    type TestCycle = WakeCycle<ScriptedSignals, FakeRefresher, FakeDelay, FakeSleep, LoggingStore>;

    fn signals(data_ready: bool, power_present: bool) -> RawSignals {
        RawSignals {
            data_ready: Some(data_ready),
            power_present: Some(power_present),
        }
    }

    fn make_cycle(script: Vec<RawSignals>, fallback: RawSignals, prior: i32) -> (TestCycle, Log) {
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let cycle = WakeCycle::new(
            ScriptedSignals {
                log: log.clone(),
                script: script.into(),
                fallback,
            },
            FakeRefresher {
                log: log.clone(),
                fail: false,
            },
            FakeDelay { log: log.clone() },
            FakeSleep {
                log: log.clone(),
                fail: false,
            },
            LoggingStore {
                log: log.clone(),
                inner: MemoryRetainedStore::with_value(prior),
                fail: false,
            },
            CycleTiming::default(),
        );
        (cycle, log)
    }

    fn events(log: &Log) -> Vec<Event> {
        log.borrow().clone()
    }

    const WAIT: Duration = Duration::from_secs(10);
    const STAY: Duration = Duration::from_secs(120);
    const SETTLE: Duration = Duration::from_secs(15);

    #[test]
    fn default_timing_matches_panel_behaviour() {
        let timing = CycleTiming::default();
        assert_eq!(timing.stay_awake, STAY);
        assert_eq!(timing.settle, SETTLE);
        assert!(timing.wait_retry < Duration::from_secs(60));
    }

    #[tokio::test]
    async fn waits_without_refresh_or_sleep_then_sleeps_when_data_arrives() {
        let (mut cycle, log) = make_cycle(vec![signals(false, false)], signals(true, false), 0);

        let report = cycle.run_cycle().await;

        assert_eq!(
            events(&log),
            vec![
                Event::Load,
                Event::Sample,
                Event::Store(Action::WaitForData.code()),
                Event::Delay(WAIT),
                Event::Load,
                Event::Sample,
                Event::Store(Action::DeepSleep.code()),
                Event::Refresh,
                Event::Delay(SETTLE),
                Event::Sleep,
            ]
        );
        assert_eq!(report.passes, 2);
        assert_eq!(report.end, CycleEnd::DeepSleep);
    }

    #[tokio::test]
    async fn first_wait_pass_only_persists_and_delays() {
        let (mut cycle, log) = make_cycle(vec![signals(false, false)], signals(true, false), 0);
        cycle.run_cycle().await;

        let first_pass: Vec<Event> = events(&log).into_iter().take(4).collect();
        assert!(!first_pass.contains(&Event::Refresh));
        assert!(!first_pass.contains(&Event::Sleep));
        assert_eq!(first_pass[2], Event::Store(1));
        assert_eq!(first_pass[3], Event::Delay(WAIT));
    }

    #[tokio::test]
    async fn stay_awake_refreshes_delays_and_re_enters() {
        let (mut cycle, log) = make_cycle(vec![signals(true, true)], signals(true, false), 0);

        let report = cycle.run_cycle().await;

        assert_eq!(
            events(&log),
            vec![
                Event::Load,
                Event::Sample,
                Event::Store(Action::StayAwake.code()),
                Event::Refresh,
                Event::Delay(STAY),
                Event::Load,
                Event::Sample,
                Event::Store(Action::DeepSleep.code()),
                Event::Refresh,
                Event::Delay(SETTLE),
                Event::Sleep,
            ]
        );
        assert_eq!(report.passes, 2);
    }

    #[tokio::test]
    async fn deep_sleep_refreshes_settles_then_sleeps() {
        let (mut cycle, log) = make_cycle(vec![], signals(true, false), 0);

        let report = cycle.run_cycle().await;

        assert_eq!(
            events(&log),
            vec![
                Event::Load,
                Event::Sample,
                Event::Store(0),
                Event::Refresh,
                Event::Delay(SETTLE),
                Event::Sleep,
            ]
        );
        assert_eq!(
            report,
            CycleReport {
                passes: 1,
                last_action: Action::DeepSleep,
                end: CycleEnd::DeepSleep,
                slept: true,
            }
        );
    }

    #[tokio::test]
    async fn unplugging_between_stay_awake_passes_leads_to_sleep() {
        let script = vec![signals(true, true), signals(true, true), signals(true, false)];
        let (mut cycle, log) = make_cycle(script, signals(true, true), 0);

        let report = cycle.run_cycle().await;

        let stores: Vec<Event> = events(&log)
            .into_iter()
            .filter(|e| matches!(e, Event::Store(_)))
            .collect();
        assert_eq!(stores, vec![Event::Store(2), Event::Store(2), Event::Store(0)]);
        assert_eq!(report.passes, 3);
        assert_eq!(report.last_action, Action::DeepSleep);
    }

    #[tokio::test]
    async fn stores_once_per_pass_and_before_sleep() {
        let script = vec![signals(false, true), signals(true, true), signals(true, false)];
        let (mut cycle, log) = make_cycle(script, signals(true, false), 0);

        let report = cycle.run_cycle().await;
        let log = events(&log);

        let samples = log.iter().filter(|e| **e == Event::Sample).count();
        let stores = log.iter().filter(|e| matches!(e, Event::Store(_))).count();
        let loads = log.iter().filter(|e| **e == Event::Load).count();
        assert_eq!(samples as u32, report.passes);
        assert_eq!(stores, samples);
        assert_eq!(loads, samples);

        let last_store = log.iter().rposition(|e| matches!(e, Event::Store(_))).unwrap();
        let sleep = log.iter().position(|e| *e == Event::Sleep).unwrap();
        assert!(last_store < sleep);
        assert_eq!(log.last(), Some(&Event::Sleep));
    }

    #[tokio::test]
    async fn stay_awake_never_sleeps() {
        let script = vec![signals(true, true); 5];
        let (mut cycle, log) = make_cycle(script, signals(true, false), 0);
        cycle.run_cycle().await;

        let log = events(&log);
        let sleeps = log.iter().filter(|e| **e == Event::Sleep).count();
        let stays = log.iter().filter(|e| **e == Event::Delay(STAY)).count();
        assert_eq!(sleeps, 1);
        assert_eq!(stays, 5);
    }

    #[tokio::test]
    async fn gives_up_on_data_after_retry_budget() {
        let (mut cycle, log) = make_cycle(vec![], signals(false, true), 0);
        cycle.timing.max_wait_retries = 3;

        let report = cycle.run_cycle().await;
        let log = events(&log);

        assert_eq!(report.passes, 4);
        assert_eq!(report.end, CycleEnd::DataTimeout);
        assert_eq!(report.last_action, Action::WaitForData);
        assert!(!log.contains(&Event::Refresh));
        assert_eq!(log.iter().filter(|e| **e == Event::Delay(WAIT)).count(), 3);
        assert_eq!(&log[log.len() - 2..], &[Event::Delay(SETTLE), Event::Sleep]);
        assert_eq!(cycle.store.inner.load(), Action::WaitForData.code());
    }

    #[tokio::test]
    async fn failed_refresh_still_settles_and_sleeps() {
        let (mut cycle, log) = make_cycle(vec![], signals(true, false), 0);
        cycle.refresher.fail = true;

        let report = cycle.run_cycle().await;

        assert!(report.slept);
        assert_eq!(
            &events(&log)[2..],
            &[Event::Store(0), Event::Refresh, Event::Delay(SETTLE), Event::Sleep]
        );
    }

    #[tokio::test]
    async fn stay_awake_pass_resets_wait_budget() {
        let mut script = Vec::new();
        for _ in 0..4 {
            script.push(signals(false, true));
            script.push(signals(true, true));
        }
        script.push(signals(true, false));
        let (mut cycle, log) = make_cycle(script, signals(true, false), 0);
        cycle.timing.max_wait_retries = 3;

        let report = cycle.run_cycle().await;
        let log = events(&log);

        assert_eq!(report.end, CycleEnd::DeepSleep);
        assert_eq!(report.last_action, Action::DeepSleep);
        assert_eq!(report.passes, 9);
        assert_eq!(log.iter().filter(|e| **e == Event::Delay(WAIT)).count(), 4);
        assert_eq!(log.iter().filter(|e| **e == Event::Sleep).count(), 1);
    }

    #[tokio::test]
    async fn consecutive_waits_still_exhaust_budget_after_stay_awake() {
        let script = vec![
            signals(true, true),
            signals(false, true),
            signals(false, true),
            signals(false, true),
        ];
        let (mut cycle, log) = make_cycle(script, signals(true, true), 0);
        cycle.timing.max_wait_retries = 2;

        let report = cycle.run_cycle().await;

        assert_eq!(report.end, CycleEnd::DataTimeout);
        assert_eq!(report.passes, 4);
        assert_eq!(events(&log).iter().filter(|e| **e == Event::Delay(WAIT)).count(), 2);
    }

    #[tokio::test]
    async fn failed_sleep_entry_is_reported() {
        let (mut cycle, log) = make_cycle(vec![], signals(true, false), 0);
        cycle.sleeper.fail = true;

        let report = cycle.run_cycle().await;

        assert!(!report.slept);
        assert_eq!(report.end, CycleEnd::DeepSleep);
        assert_eq!(
            &events(&log)[3..],
            &[Event::Refresh, Event::Delay(SETTLE), Event::Sleep]
        );
    }

    #[tokio::test]
    async fn failed_retained_write_still_runs_branch() {
        let (mut cycle, log) = make_cycle(vec![], signals(true, false), 0);
        cycle.store.fail = true;

        let report = cycle.run_cycle().await;

        assert!(report.slept);
        assert_eq!(
            events(&log),
            vec![
                Event::Load,
                Event::Sample,
                Event::Store(0),
                Event::Refresh,
                Event::Delay(SETTLE),
                Event::Sleep,
            ]
        );
        assert_eq!(cycle.store.inner.writes(), 0);
    }

    #[tokio::test]
    async fn prior_decision_does_not_change_branch() {
        for prior in [0, 1, 2, 99] {
            let (mut cycle, _log) = make_cycle(vec![], signals(true, false), prior);
            let report = cycle.run_cycle().await;
            assert_eq!(report.last_action, Action::DeepSleep);
            assert_eq!(report.passes, 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn tokio_delay_waits_for_full_duration() {
        let mut delay = TokioDelay;
        let start = tokio::time::Instant::now();
        delay.delay(SETTLE).await;
        assert!(start.elapsed() >= SETTLE);
    }
}
