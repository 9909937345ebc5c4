mod common;

use std::{sync::atomic::Ordering, time::Duration};

use tokio::time::Instant;

use common::{FakePods, Harness, job, pod, running, unschedulable_pod, waiting_pod};
use herd_cluster::PodPhase;
use herd_model::{TrainingStatus, error_code, key_path};
use herd_monitor::{AggregationTrigger, ImagePullOutcome, StartOutcome};

fn harness(num_learners: u32, pods: std::sync::Arc<FakePods>) -> Harness {
    Harness::with(job(num_learners, false), AggregationTrigger::Poll, pods)
}

#[tokio::test(start_paused = true)]
async fn start_detected_when_learners_and_helper_run() {
    let h = harness(1, FakePods::showing(running(2)));

    assert_eq!(h.monitor.detect_start().await, StartOutcome::Started);
    assert_eq!(h.pods.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.lifecycle.kills(), 0);
}

#[tokio::test(start_paused = true)]
async fn parameter_server_jobs_need_an_extra_pod() {
    let mut j = job(1, false);
    j.uses_parameter_server = true;

    let pods = FakePods::showing(Vec::new());
    pods.then(running(2));
    pods.then(running(3));
    let h = Harness::with(j.clone(), AggregationTrigger::Poll, pods);
    assert_eq!(h.monitor.detect_start().await, StartOutcome::Started);
    assert_eq!(h.pods.calls.load(Ordering::SeqCst), 2);

    let h = Harness::with(j, AggregationTrigger::Poll, FakePods::showing(running(2)));
    assert_eq!(h.monitor.detect_start().await, StartOutcome::Undecided);
    assert_eq!(h.pods.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn unschedulable_pods_fail_the_job_for_insufficient_resources() {
    let h = harness(1, FakePods::showing(vec![pod("learner-0", PodPhase::Running), unschedulable_pod("ps-0")]));
    h.seed().await;

    let started = Instant::now();
    assert_eq!(h.monitor.detect_start().await, StartOutcome::InsufficientResources);
    // Two intervals between three polls, then the teardown grace.
    assert!(started.elapsed() >= Duration::from_secs(70));

    assert_eq!(h.overall().await.as_deref(), Some("FAILED"));
    let last = h.sink.last().unwrap();
    assert_eq!(last.status, TrainingStatus::Failed);
    assert_eq!(last.error_code, error_code::INSUFFICIENT_RESOURCES);
    assert_eq!(last.status_message, "INSUFFICIENT_RESOURCES");
    assert_eq!(h.lifecycle.kills(), 1);
    assert_eq!(h.counter("herd_insufficient_resources_total"), 1.0);
    assert_eq!(h.counter(r#"herd_status_transitions_total{status="FAILED"}"#), 1.0);
}

#[tokio::test(start_paused = true)]
async fn scheduled_but_pending_pods_also_fail_the_job() {
    let h = harness(1, FakePods::showing(vec![pod("learner-0", PodPhase::Running), waiting_pod("ps-0", "ContainerCreating")]));
    h.seed().await;

    assert_eq!(h.monitor.detect_start().await, StartOutcome::InsufficientResources);
    assert_eq!(h.pods.calls.load(Ordering::SeqCst), 3);
    assert_eq!(h.sink.last().unwrap().error_code, error_code::INSUFFICIENT_RESOURCES);
    assert_eq!(h.lifecycle.kills(), 1);
    assert_eq!(h.counter("herd_insufficient_resources_total"), 1.0);
}

#[tokio::test(start_paused = true)]
async fn succeeded_pods_are_neither_pending_nor_failed() {
    let h = harness(1, FakePods::showing(vec![pod("learner-0", PodPhase::Succeeded), pod("ps-0", PodPhase::Running)]));
    h.seed().await;

    assert_eq!(h.monitor.detect_start().await, StartOutcome::Undecided);
    assert!(h.sink.statuses().is_empty());
    assert_eq!(h.lifecycle.kills(), 0);
    assert_eq!(h.counter("herd_insufficient_resources_total"), 0.0);
}

#[tokio::test(start_paused = true)]
async fn failed_pods_with_nothing_running_fail_the_job() {
    let h = harness(1, FakePods::showing(vec![pod("a", PodPhase::Failed), pod("b", PodPhase::Failed)]));

    assert_eq!(h.monitor.detect_start().await, StartOutcome::PodsFailed);

    // Without a seeded status the failure is still recorded.
    assert_eq!(h.overall().await.as_deref(), Some("FAILED"));
    let last = h.sink.last().unwrap();
    assert_eq!(last.error_code, error_code::FAILED_POD_REASON_UNKNOWN);
    assert_eq!(last.status_message, "INTERNAL_ERROR");
    assert_eq!(h.lifecycle.kills(), 1);
    assert_eq!(h.counter("herd_insufficient_resources_total"), 0.0);
}

#[tokio::test(start_paused = true)]
async fn partially_running_job_is_left_alone() {
    let h = harness(1, FakePods::showing(vec![pod("a", PodPhase::Running), pod("b", PodPhase::Failed)]));
    h.seed().await;

    assert_eq!(h.monitor.detect_start().await, StartOutcome::Undecided);
    assert_eq!(h.overall().await.as_deref(), Some("NOT_STARTED"));
    assert!(h.sink.statuses().is_empty());
    assert_eq!(h.lifecycle.kills(), 0);
}

#[tokio::test(start_paused = true)]
async fn orchestrator_errors_are_counted_and_polling_goes_on() {
    let pods = FakePods::showing(running(2));
    pods.fail_next(1);
    let h = harness(1, pods);

    assert_eq!(h.monitor.detect_start().await, StartOutcome::Started);
    assert_eq!(h.pods.calls.load(Ordering::SeqCst), 2);
    assert_eq!(h.counter("herd_orchestrator_connectivity_failed_total"), 1.0);
}

#[tokio::test(start_paused = true)]
async fn finished_job_is_not_failed_by_start_detection() {
    let h = harness(1, FakePods::showing(vec![unschedulable_pod("a")]));
    let path = key_path::overall_status_path(&h.monitor.job().training_id);
    h.coord.put_if_missing(&path, "COMPLETED").await.unwrap();

    assert_eq!(h.monitor.detect_start().await, StartOutcome::AlreadyFinished);
    assert_eq!(h.overall().await.as_deref(), Some("COMPLETED"));
    assert!(h.sink.statuses().is_empty());
    assert_eq!(h.lifecycle.kills(), 0);
    assert_eq!(h.counter("herd_insufficient_resources_total"), 0.0);
}

#[tokio::test(start_paused = true)]
async fn start_detection_stops_on_shutdown() {
    let h = harness(1, FakePods::showing(Vec::new()));
    h.monitor.shutdown();

    assert_eq!(h.monitor.detect_start().await, StartOutcome::Cancelled);
    assert_eq!(h.pods.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn failed_image_pull_fails_the_job() {
    let h = harness(1, FakePods::showing(vec![pod("ps-0", PodPhase::Running), waiting_pod("learner-0", "ErrImagePull")]));
    h.seed().await;

    assert_eq!(
        h.monitor.watch_image_pull().await,
        ImagePullOutcome::Failed {
            container: "learner".into(),
            reason: "ErrImagePull".into(),
        }
    );
    assert_eq!(h.overall().await.as_deref(), Some("FAILED"));
    let last = h.sink.last().unwrap();
    assert_eq!(last.error_code, error_code::IMAGE_PULL);
    assert_eq!(h.lifecycle.kills(), 1);
    assert_eq!(h.counter("herd_image_pull_failed_total"), 1.0);
}

#[tokio::test(start_paused = true)]
async fn image_pull_watch_ends_once_nothing_waits() {
    let pods = FakePods::showing(Vec::new());
    pods.then(vec![waiting_pod("learner-0", "ContainerCreating")]);
    pods.then(running(2));
    let h = harness(1, pods);

    let started = Instant::now();
    assert_eq!(h.monitor.watch_image_pull().await, ImagePullOutcome::Clear);
    assert!(started.elapsed() >= Duration::from_secs(5));
    assert_eq!(h.pods.calls.load(Ordering::SeqCst), 2);
    assert!(h.sink.statuses().is_empty());
    assert_eq!(h.lifecycle.kills(), 0);
}

#[tokio::test(start_paused = true)]
async fn image_pull_watch_waits_for_pods_to_appear() {
    let pods = FakePods::showing(Vec::new());
    pods.then(Vec::new());
    pods.then(Vec::new());
    pods.then(running(2));
    let h = harness(1, pods);

    let started = Instant::now();
    assert_eq!(h.monitor.watch_image_pull().await, ImagePullOutcome::Clear);
    assert!(started.elapsed() >= Duration::from_secs(10));
    assert_eq!(h.pods.calls.load(Ordering::SeqCst), 3);
    assert_eq!(h.lifecycle.kills(), 0);
}

#[tokio::test(start_paused = true)]
async fn image_pull_watch_never_clears_on_an_empty_listing() {
    let h = harness(1, FakePods::showing(Vec::new()));
    let monitor = h.monitor.clone();
    let watch = tokio::spawn(async move { monitor.watch_image_pull().await });

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(!watch.is_finished());
    assert!(h.pods.calls.load(Ordering::SeqCst) >= 10);

    h.monitor.shutdown();
    assert_eq!(watch.await.unwrap(), ImagePullOutcome::Cancelled);
    assert_eq!(h.lifecycle.kills(), 0);
}

#[tokio::test(start_paused = true)]
async fn image_pull_watch_retries_listing_errors() {
    let pods = FakePods::showing(running(2));
    pods.fail_next(2);
    let h = harness(1, pods);

    assert_eq!(h.monitor.watch_image_pull().await, ImagePullOutcome::Clear);
    assert_eq!(h.pods.calls.load(Ordering::SeqCst), 3);
    assert_eq!(h.counter("herd_orchestrator_connectivity_failed_total"), 2.0);
}

#[tokio::test(start_paused = true)]
async fn image_pull_watch_stops_on_shutdown() {
    let h = harness(1, FakePods::showing(Vec::new()));
    h.monitor.shutdown();

    assert_eq!(h.monitor.watch_image_pull().await, ImagePullOutcome::Cancelled);
    assert_eq!(h.lifecycle.kills(), 0);
}
