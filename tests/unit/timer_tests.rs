use std::time::Duration;

use doc_supervisor::orchestrator::{
    reattach_timeout, LivenessTimer, Timeouts, ORPHAN_PROCESS_TIMEOUT, ZOMBIE_PROCESS_TIMEOUT,
};
use doc_supervisor::proc::{ExitState, WorkerProcess};
use doc_supervisor::{AppError, BoxFuture, Result};

struct ExitsAfter(Duration);

impl WorkerProcess for ExitsAfter {
    fn pid(&self) -> u32 {
        10
    }

    fn start_time(&self) -> u64 {
        20
    }

    fn kill(&mut self) -> Result<()> {
        Err(AppError::Process("not supported".into()))
    }

    fn wait(&mut self) -> BoxFuture<'_, Result<ExitState>> {
        let after = self.0;
        Box::pin(async move {
            tokio::time::sleep(after).await;
            Ok(ExitState {
                success: false,
                code: Some(2),
            })
        })
    }
}

#[test]
fn protocol_timeouts() {
    assert_eq!(ZOMBIE_PROCESS_TIMEOUT, Duration::from_secs(2));
    assert_eq!(ORPHAN_PROCESS_TIMEOUT, Duration::from_secs(172_800));

    let defaults = Timeouts::default();
    assert_eq!(reattach_timeout(true, &defaults), Duration::from_secs(48 * 60 * 60));
    assert_eq!(reattach_timeout(false, &defaults), Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn armed_timer_fires_after_duration() {
    let timer = LivenessTimer::new();
    let task = timer.arm(Duration::from_secs(2));

    tokio::time::sleep(Duration::from_millis(1_900)).await;
    assert!(!timer.has_fired());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(timer.has_fired());
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn release_stops_pending_timer() {
    let timer = LivenessTimer::new();
    let task = timer.arm(ORPHAN_PROCESS_TIMEOUT);

    timer.release();
    task.await.unwrap();
    assert!(!timer.has_fired());
}

#[tokio::test(start_paused = true)]
async fn exit_watcher_arms_short_timeout_after_exit() {
    let timer = LivenessTimer::new();
    let task = timer.arm_on_exit(
        Box::new(ExitsAfter(Duration::from_secs(60))),
        ZOMBIE_PROCESS_TIMEOUT,
    );

    tokio::time::sleep(Duration::from_secs(61)).await;
    assert!(!timer.has_fired(), "still within the short timeout");

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(timer.has_fired());
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn exit_watcher_ends_with_the_run() {
    let timer = LivenessTimer::new();
    let task = timer.arm_on_exit(
        Box::new(ExitsAfter(Duration::from_secs(3_600))),
        ZOMBIE_PROCESS_TIMEOUT,
    );

    timer.release();
    task.await.unwrap();
    assert!(!timer.has_fired());
}
