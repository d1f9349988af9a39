//! Per-member fan-out.
//!
//! Every member task runs on its own tokio task. Results are collected by
//! joining the handles in dispatch order, so the output order matches the
//! input order. A task that exceeds the per-member timeout or panics is
//! reported as a failure for that member only.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::types::{FAILED_STATUS, TargetStatus};

/// Run every `(seed, task)` pair concurrently and collect one status per pair.
///
/// `seed` carries the member identity used when the task produces no
/// status of its own.
pub async fn run_per_member<Fut>(
    tasks: Vec<(TargetStatus, Fut)>,
    timeout: Option<Duration>,
) -> Vec<TargetStatus>
where
    Fut: Future<Output = TargetStatus> + Send + 'static,
{
    let mut handles = Vec::with_capacity(tasks.len());
    for (seed, task) in tasks {
        let timeout_seed = seed.clone();
        let handle = tokio::spawn(async move {
            match timeout {
                Some(limit) => match tokio::time::timeout(limit, task).await {
                    Ok(status) => status,
                    Err(_) => {
                        warn!(
                            member_id = timeout_seed.member_id,
                            timeout_secs = limit.as_secs(),
                            "member task timed out"
                        );
                        timeout_seed.with_status(format!(
                            "{FAILED_STATUS}: timed out after {}s",
                            limit.as_secs()
                        ))
                    }
                },
                None => task.await,
            }
        });
        handles.push((seed, handle));
    }

    let mut results = Vec::with_capacity(handles.len());
    for (seed, handle) in handles {
        match handle.await {
            Ok(status) => results.push(status),
            Err(e) => {
                warn!(member_id = seed.member_id, error = %e, "member task aborted");
                results.push(seed.with_status(format!("{FAILED_STATUS}: task aborted: {e}")));
            }
        }
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;

    type Task = Pin<Box<dyn Future<Output = TargetStatus> + Send>>;

    fn seed(member_id: u64) -> TargetStatus {
        TargetStatus {
            member_id,
            member_name: format!("node-{member_id}"),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn results_follow_dispatch_order() {
        let tasks: Vec<(TargetStatus, Task)> = (1..=3)
            .map(|id| {
                let s = seed(id);
                let done = s.clone();
                let task: Task = Box::pin(async move {
                    // Later members finish first.
                    tokio::time::sleep(Duration::from_millis(30 - id * 10)).await;
                    done.with_status("deployed")
                });
                (s, task)
            })
            .collect();

        let results = run_per_member(tasks, None).await;
        let ids: Vec<u64> = results.iter().map(|r| r.member_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert!(results.iter().all(|r| r.status == "deployed"));
    }

    #[tokio::test]
    async fn hung_member_becomes_failure() {
        let fast = seed(1);
        let done = fast.clone();
        let fast_task: Task = Box::pin(async move { done.with_status("deployed") });
        let hung_task: Task = Box::pin(async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            seed(2).with_status("deployed")
        });
        let tasks = vec![(fast, fast_task), (seed(2), hung_task)];

        let results = run_per_member(tasks, Some(Duration::from_millis(50))).await;
        assert_eq!(results[0].status, "deployed");
        assert!(results[1].is_failure());
        assert!(results[1].status.contains("timed out"));
        assert_eq!(results[1].member_name, "node-2");
    }

    #[tokio::test]
    async fn panicking_member_becomes_failure() {
        let exploding: Task = Box::pin(async move {
            if seed(7).member_id == 7 {
                panic!("installer exploded");
            }
            seed(7)
        });

        let results = run_per_member(vec![(seed(7), exploding)], None).await;
        assert_eq!(results.len(), 1);
        assert!(results[0].is_failure());
        assert_eq!(results[0].member_id, 7);
    }

    #[tokio::test]
    async fn empty_fan_out() {
        let results = run_per_member(Vec::<(TargetStatus, Task)>::new(), None).await;
        assert!(results.is_empty());
    }
}
