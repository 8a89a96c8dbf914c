//! Deployment watcher
//!
//! Confirms that a freshly launched app container came up. [`arm`] records
//! a target and hands back a receiver for its single [`DeployReport`]. A
//! background loop waits out the grace period, then looks for the id in the
//! container listing a bounded number of times.
//!
//! Only one target is tracked. Arming again replaces the previous target,
//! whose receiver then resolves with `RecvError`.
//!
//! [`arm`]: DeploymentWatcher::arm

use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::runner::{argv, CommandRunner};

/// Outcome of one armed deployment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployReport {
    pub id: String,
    pub name: String,
    pub started: bool,
    pub message: String,
}

impl DeployReport {
    fn new(id: &str, name: &str, started: bool) -> Self {
        let message = if started {
            format!("{} is started successfully.", name)
        } else {
            format!(
                "{} is NOT started successfully. Please contact the car OEM for more information !!!",
                name
            )
        };
        Self {
            id: id.to_string(),
            name: name.to_string(),
            started,
            message,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Idle,
    Armed,
    Checking,
}

struct Pending {
    id: String,
    name: String,
    armed_at: Instant,
    reply: oneshot::Sender<DeployReport>,
}

#[derive(Default)]
struct Slot {
    pending: Option<Pending>,
    checking: bool,
}

pub struct DeploymentWatcher {
    config: Arc<Config>,
    runner: Arc<dyn CommandRunner>,
    slot: Mutex<Slot>,
}

impl DeploymentWatcher {
    pub fn new(config: Arc<Config>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            config,
            runner,
            slot: Mutex::new(Slot::default()),
        }
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn arm(&self, id: &str, name: &str) -> oneshot::Receiver<DeployReport> {
        let (reply, rx) = oneshot::channel();
        let mut slot = self.slot();
        if let Some(previous) = slot.pending.take() {
            log::warn!(
                "Deployment watch for {} replaced by {} before it was checked",
                previous.id,
                id
            );
        }
        slot.pending = Some(Pending {
            id: id.to_string(),
            name: name.to_string(),
            armed_at: Instant::now(),
            reply,
        });
        log::debug!("Watching deployment of {} ({})", name, id);
        rx
    }

    pub fn state(&self) -> WatchState {
        let slot = self.slot();
        if slot.checking {
            WatchState::Checking
        } else if slot.pending.is_some() {
            WatchState::Armed
        } else {
            WatchState::Idle
        }
    }

    /// One wake of the loop: check the pending target if its grace period is over
    pub async fn tick(&self) {
        let grace = self.config.deploy_grace();
        let due = {
            let mut slot = self.slot();
            let ready = slot
                .pending
                .as_ref()
                .map(|p| p.armed_at.elapsed() >= grace)
                .unwrap_or(false);
            if ready {
                slot.checking = true;
                slot.pending.take()
            } else {
                None
            }
        };

        if let Some(target) = due {
            self.check(target).await;
            self.slot().checking = false;
        }
    }

    async fn check(&self, target: Pending) {
        let attempts = self.config.deploy_checks.max(1);
        for attempt in 1..=attempts {
            if attempt > 1 {
                sleep(self.config.deploy_retry()).await;
            }
            if self.listing_contains(&target.id).await {
                self.report(target, true);
                return;
            }
            if self.slot().pending.is_some() {
                log::debug!("Deployment watch for {} superseded", target.id);
                return;
            }
            log::debug!(
                "{} not in container listing (check {}/{})",
                target.id,
                attempt,
                attempts
            );
        }
        self.report(target, false);
    }

    async fn listing_contains(&self, id: &str) -> bool {
        match self
            .runner
            .run(&self.config.docker, &argv(["ps"]), self.config.inspect_timeout())
            .await
        {
            Ok(output) if output.success() => output.stdout.contains(id),
            Ok(output) => {
                log::warn!("docker ps failed: {}", output.stderr.trim());
                false
            }
            Err(e) => {
                log::warn!("{}", e);
                false
            }
        }
    }

    fn report(&self, target: Pending, started: bool) {
        let report = DeployReport::new(&target.id, &target.name, started);
        if started {
            log::info!("{}", report.message);
        } else {
            log::warn!("{}", report.message);
        }
        if target.reply.send(report).is_err() {
            log::debug!("Nobody waiting on deployment report for {}", target.id);
        }
    }

    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut wake = interval(self.config.watcher_wake());
            wake.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = wake.tick() => self.tick().await,
                }
            }
            log::debug!("Deployment watcher stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::ScriptedRunner;
    use std::time::Duration;

    fn watcher(runner: Arc<ScriptedRunner>) -> Arc<DeploymentWatcher> {
        let config = Arc::new(Config::default().with_root("/tmp/dkorch-watcher"));
        Arc::new(DeploymentWatcher::new(config, runner))
    }

    const LISTING_WITH_C1: &str =
        "CONTAINER ID   IMAGE   COMMAND   CREATED   STATUS   PORTS   NAMES\n0f0f  base  \"python\"  1s ago  Up 1s    c1\n";

    #[tokio::test(start_paused = true)]
    async fn test_reports_success_once() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.on(&["docker", "ps"], LISTING_WITH_C1);
        let watcher = watcher(Arc::clone(&runner));
        let cancel = CancellationToken::new();
        let task = Arc::clone(&watcher).spawn(cancel.clone());

        let rx = watcher.arm("c1", "App");
        assert_eq!(watcher.state(), WatchState::Armed);

        let report = rx.await.unwrap();
        assert!(report.started);
        assert_eq!(report.name, "App");
        assert_eq!(report.message, "App is started successfully.");
        assert_eq!(runner.count(&["docker", "ps"]), 1);

        // Nothing further is checked once reported
        sleep(Duration::from_secs(10)).await;
        assert_eq!(runner.count(&["docker", "ps"]), 1);
        assert_eq!(watcher.state(), WatchState::Idle);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_grace_period() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.on(&["docker", "ps"], LISTING_WITH_C1);
        let watcher = watcher(Arc::clone(&runner));
        let _rx = watcher.arm("c1", "App");

        sleep(Duration::from_millis(2900)).await;
        watcher.tick().await;
        assert_eq!(runner.count(&["docker", "ps"]), 0);

        sleep(Duration::from_millis(100)).await;
        watcher.tick().await;
        assert_eq!(runner.count(&["docker", "ps"]), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_report_pending_until_checked() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.on(&["docker", "ps"], LISTING_WITH_C1);
        let watcher = watcher(Arc::clone(&runner));
        let mut rx = tokio_test::task::spawn(watcher.arm("c1", "App"));
        tokio_test::assert_pending!(rx.poll());

        sleep(Duration::from_secs(1)).await;
        watcher.tick().await;
        tokio_test::assert_pending!(rx.poll());

        sleep(Duration::from_secs(2)).await;
        watcher.tick().await;
        let report = tokio_test::assert_ready_ok!(rx.poll());
        assert_eq!(report.id, "c1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_reports_failure_after_bounded_checks() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.on(&["docker", "ps"], "CONTAINER ID   NAMES\n");
        let watcher = watcher(Arc::clone(&runner));
        let cancel = CancellationToken::new();
        Arc::clone(&watcher).spawn(cancel.clone());

        let started = Instant::now();
        let report = watcher.arm("c1", "App").await.unwrap();
        assert!(!report.started);
        assert_eq!(
            report.message,
            "App is NOT started successfully. Please contact the car OEM for more information !!!"
        );
        assert_eq!(runner.count(&["docker", "ps"]), 3);
        // Grace plus two retry gaps
        assert!(started.elapsed() >= Duration::from_secs(5));
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_command_failure_counts_as_not_started() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.on_fail(&["docker", "ps"], 1, "daemon down");
        let watcher = watcher(Arc::clone(&runner));
        Arc::clone(&watcher).spawn(CancellationToken::new());

        let report = watcher.arm("c1", "App").await.unwrap();
        assert!(!report.started);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_start_within_retries() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.on(&["docker", "ps"], "CONTAINER ID   NAMES\n");
        let watcher = watcher(Arc::clone(&runner));
        Arc::clone(&watcher).spawn(CancellationToken::new());

        let rx = watcher.arm("c1", "App");
        // First check at 3 s misses, second at 4 s sees the container
        sleep(Duration::from_millis(3500)).await;
        runner.on(&["docker", "ps"], LISTING_WITH_C1);
        let report = rx.await.unwrap();
        assert!(report.started);
        assert_eq!(runner.count(&["docker", "ps"]), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_arm_replaces_first() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.on(&["docker", "ps"], "0f0f  base  Up 1s  c2\n");
        let watcher = watcher(Arc::clone(&runner));
        Arc::clone(&watcher).spawn(CancellationToken::new());

        let first = watcher.arm("c1", "First");
        let second = watcher.arm("c2", "Second");

        assert!(first.await.is_err());
        let report = second.await.unwrap();
        assert_eq!(report.id, "c2");
        assert!(report.started);
        assert_eq!(runner.count(&["docker", "ps"]), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_arm_during_check_supersedes_it() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.on(&["docker", "ps"], "CONTAINER ID   NAMES\n");
        let watcher = watcher(Arc::clone(&runner));
        Arc::clone(&watcher).spawn(CancellationToken::new());

        let first = watcher.arm("c1", "First");
        // Inside the retry gap of the first target's check
        sleep(Duration::from_millis(3500)).await;
        assert_eq!(watcher.state(), WatchState::Checking);
        let second = watcher.arm("c2", "Second");

        assert!(first.await.is_err());
        let report = second.await.unwrap();
        assert_eq!(report.id, "c2");
        assert!(!report.started);
    }
}
