
use std::time::Duration;

use jobpool::recovery::RecoveryCoordinator;
use jobpool::scheduler::{Job, JobPriority, JobStatus};
use jobpool::store::{JobOrder, JobStore};
use test_harness::{fast_pool_config, wait_until, FixedExecutor, TestNode};

fn quick() -> std::sync::Arc<FixedExecutor> {
    FixedExecutor::new(3, Duration::from_millis(5))
}

#[tokio::test]
async fn test_created_jobs_complete_end_to_end() {
    let node = TestNode::spawn(fast_pool_config(2, 4), quick(), None).await;

    let mut ids = Vec::new();
    for i in 0..6 {
        let priority = if i % 2 == 0 {
            JobPriority::High
        } else {
            JobPriority::Regular
        };
        let job = node
            .service
            .create_job(&format!("job-{i}"), priority)
            .await
            .unwrap();
        ids.push(job.id);
    }

    for id in &ids {
        assert!(node.wait_for_status(*id, JobStatus::Completed).await);
    }

    let jobs = node.service.list_jobs(JobOrder::CreatedAt, None).await;
    assert_eq!(jobs.len(), 6);
    for job in jobs {
        assert_eq!(job.progress, 100);
        assert!(job.started_at > 0);
        assert!(job.completed_at >= job.started_at);
    }

    node.stop().await;
}

#[tokio::test]
async fn test_stop_queued_and_running_jobs() {
    let node = TestNode::spawn(fast_pool_config(1, 1), FixedExecutor::endless(), None).await;

    let running = node
        .service
        .create_job("long", JobPriority::High)
        .await
        .unwrap();
    assert!(node.wait_for_status(running.id, JobStatus::Running).await);

    let queued = node
        .service
        .create_job("waiting", JobPriority::Regular)
        .await
        .unwrap();
    assert!(node.wait_for_status(queued.id, JobStatus::InQueue).await);

    node.service.stop_job(queued.id).await.unwrap();
    assert!(node.wait_for_status(queued.id, JobStatus::Stopped).await);

    node.service.stop_job(running.id).await.unwrap();
    assert!(node.wait_for_status(running.id, JobStatus::Stopped).await);

    let stopped = node.service.get_job(&running.id).await.unwrap();
    assert!(stopped.error_message.starts_with("Stop Time"));

    // Stopping again is not a valid transition.
    assert!(node.service.stop_job(running.id).await.is_err());

    node.stop().await;
}

#[tokio::test]
async fn test_restart_after_stop_runs_again() {
    let node = TestNode::spawn(
        fast_pool_config(1, 1),
        FixedExecutor::new(20, Duration::from_millis(10)),
        None,
    )
    .await;

    let job = node
        .service
        .create_job("retry-me", JobPriority::Regular)
        .await
        .unwrap();
    assert!(node.wait_for_status(job.id, JobStatus::Running).await);
    node.service.stop_job(job.id).await.unwrap();
    assert!(node.wait_for_status(job.id, JobStatus::Stopped).await);

    node.service.restart_job(job.id).await.unwrap();
    assert!(node.wait_for_status(job.id, JobStatus::Completed).await);

    node.stop().await;
}

#[tokio::test]
async fn test_queue_backup_reaches_store() {
    let node = TestNode::spawn(fast_pool_config(1, 1), FixedExecutor::endless(), None).await;

    let first = node.service.create_job("a", JobPriority::Regular).await.unwrap();
    assert!(node.wait_for_status(first.id, JobStatus::Running).await);
    let second = node.service.create_job("b", JobPriority::High).await.unwrap();
    let third = node.service.create_job("c", JobPriority::Regular).await.unwrap();

    let store = node.service.store();
    let backed_up = wait_until(Duration::from_secs(2), || async {
        let store = store.read().await;
        let mut ids: Vec<_> = store.backup().iter().map(|r| r.job_id).collect();
        ids.sort();
        let mut expected = vec![second.id, third.id];
        expected.sort();
        ids == expected
    })
    .await;
    assert!(backed_up);

    let queued = node.service.get_job(&second.id).await.unwrap();
    assert!(queued.queuing_time > 0);

    node.stop().await;
}

#[tokio::test]
async fn test_recovery_from_persisted_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("jobs.json");

    let mut queued = Job::new("queued".into(), JobPriority::High);
    queued.status = JobStatus::InQueue;
    let mut interrupted = Job::new("interrupted".into(), JobPriority::Regular);
    interrupted.status = JobStatus::Running;
    interrupted.progress = 40;
    let mut finished = Job::new("finished".into(), JobPriority::High);
    finished.status = JobStatus::Completed;
    finished.progress = 100;

    {
        let mut store = JobStore::open(&path).unwrap();
        store.replace_backup(vec![
            queued.queue_entry().with_queuing_time(1),
            finished.queue_entry().with_queuing_time(2),
        ]);
        store.add_job(queued.clone());
        store.add_job(interrupted.clone());
        store.add_job(finished.clone());
        store.flush().unwrap();

        let plan = RecoveryCoordinator::plan(&store);
        let ids: Vec<_> = plan.iter().map(|e| e.job_id).collect();
        assert_eq!(ids, vec![queued.id, interrupted.id]);
    }

    let node = TestNode::spawn(fast_pool_config(1, 2), quick(), Some(path.clone())).await;
    assert!(node.wait_for_status(queued.id, JobStatus::Completed).await);
    assert!(node.wait_for_status(interrupted.id, JobStatus::Completed).await);

    let untouched = node.service.get_job(&finished.id).await.unwrap();
    assert_eq!(untouched.status, JobStatus::Completed);
    node.stop().await;

    let reloaded = JobStore::open(&path).unwrap();
    assert_eq!(reloaded.len(), 3);
    assert_eq!(reloaded.jobs_with_status(JobStatus::Completed).len(), 3);
}

#[tokio::test]
async fn test_shutdown_then_restart_resumes_queued_jobs() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("jobs.json");

    let node = TestNode::spawn(
        fast_pool_config(1, 1),
        FixedExecutor::endless(),
        Some(path.clone()),
    )
    .await;
    let running = node.service.create_job("busy", JobPriority::High).await.unwrap();
    assert!(node.wait_for_status(running.id, JobStatus::Running).await);
    let waiting_a = node.service.create_job("a", JobPriority::Regular).await.unwrap();
    let waiting_b = node.service.create_job("b", JobPriority::Regular).await.unwrap();
    assert!(node.wait_for_status(waiting_b.id, JobStatus::InQueue).await);
    node.stop().await;

    {
        let store = JobStore::open(&path).unwrap();
        assert_eq!(store.get_job(&running.id).unwrap().status, JobStatus::Failed);
        assert_eq!(store.backup().len(), 2);
        let mut planned: Vec<_> = RecoveryCoordinator::plan(&store)
            .iter()
            .map(|e| e.job_id)
            .collect();
        planned.sort();
        let mut expected = vec![waiting_a.id, waiting_b.id];
        expected.sort();
        assert_eq!(planned, expected);
    }

    let node = TestNode::spawn(fast_pool_config(1, 1), quick(), Some(path.clone())).await;
    assert!(node.wait_for_status(waiting_a.id, JobStatus::Completed).await);
    assert!(node.wait_for_status(waiting_b.id, JobStatus::Completed).await);
    let failed = node.service.get_job(&running.id).await.unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert!(failed.error_message.starts_with("Job Process Failed"));
    node.stop().await;
}

#[tokio::test]
async fn test_delete_jobs_by_status() {
    let node = TestNode::spawn(fast_pool_config(2, 2), quick(), None).await;

    let a = node.service.create_job("a", JobPriority::Regular).await.unwrap();
    let b = node.service.create_job("b", JobPriority::Regular).await.unwrap();
    assert!(node.wait_for_status(a.id, JobStatus::Completed).await);
    assert!(node.wait_for_status(b.id, JobStatus::Completed).await);

    assert_eq!(node.service.delete_jobs_by_status(JobStatus::Completed).await, 2);
    assert!(node.service.list_jobs(JobOrder::Name, None).await.is_empty());

    node.stop().await;
}
