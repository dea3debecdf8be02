// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Several independent contexts (one per simulated process) sharing a
//! project directory, coordinated only through the lock file.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use council_core::application::{CouncilContext, NewSubmission, SlotRequest};
use council_core::domain::approval::PowerDomain;
use council_core::domain::concurrency::SlotReleaseReason;
use council_core::domain::config::{CouncilConfig, LockConfig};
use council_core::domain::phase::WorkflowPhase;
use tempfile::TempDir;

fn process(max_concurrent: usize) -> CouncilContext {
    let mut config = CouncilConfig {
        lock: LockConfig {
            retries: 1_000,
            min_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(8),
            acquire_timeout: Duration::from_secs(30),
        },
        ..Default::default()
    };
    config.concurrency.max_concurrent_agents = max_concurrent;
    config.concurrency.max_queue_size = 64;
    CouncilContext::new(config)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_slot_bound_holds_across_processes() {
    let dir = TempDir::new().unwrap();
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for i in 0..8 {
        let project: PathBuf = dir.path().to_path_buf();
        let (running, peak) = (running.clone(), peak.clone());
        handles.push(tokio::spawn(async move {
            let ctx = process(2);
            let role = format!("Agent {}", i);
            let mut completed = 0;
            while completed < 3 {
                let request = SlotRequest::new(role.clone(), format!("agent-{}", i));
                let Some(slot) = ctx.concurrency.acquire_slot(&project, request).await.unwrap() else {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    continue;
                };
                let now_running = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now_running, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(3)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                ctx.concurrency
                    .release_slot(&project, &slot.slot_id, SlotReleaseReason::Completed)
                    .await
                    .unwrap();
                completed += 1;
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert!(peak.load(Ordering::SeqCst) <= 2);
    let status = process(2).concurrency.get_concurrency_status(dir.path()).await.unwrap();
    assert_eq!(status.active, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_only_one_qa_validation_in_flight() {
    let dir = TempDir::new().unwrap();
    let setup = process(3);
    for role in ["Writer", "Editor", "Critic", "Illustrator"] {
        setup
            .qa
            .enqueue_submission(dir.path(), NewSubmission::new(role, role, format!("{}.md", role)))
            .await
            .unwrap();
    }

    let mut handles = Vec::new();
    for _ in 0..6 {
        let project = dir.path().to_path_buf();
        handles.push(tokio::spawn(async move {
            process(3).qa.dequeue_submission(&project).await.unwrap()
        }));
    }
    let mut started = 0;
    for handle in handles {
        if handle.await.unwrap().is_some() {
            started += 1;
        }
    }
    assert_eq!(started, 1);

    let status = setup.qa.queue_status(dir.path()).await.unwrap();
    assert_eq!(status.pending, 3);
    assert!(status.current.is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_domain_approvals_are_not_lost() {
    let dir = TempDir::new().unwrap();
    let setup = process(3);
    for i in 0..4 {
        let role = format!("Agent {}", i);
        setup
            .phases
            .initialize_phase_state(dir.path(), &role, WorkflowPhase::PlanDesign)
            .await
            .unwrap();
        setup
            .phases
            .transition_phase(dir.path(), &role, WorkflowPhase::AwaitingApproval, None)
            .await
            .unwrap();
    }

    let mut handles = Vec::new();
    for i in 0..4 {
        for domain in [PowerDomain::Planning, PowerDomain::Execution] {
            let project = dir.path().to_path_buf();
            handles.push(tokio::spawn(async move {
                process(3)
                    .council
                    .approve_agent_plan(&project, &format!("Agent {}", i), "lead", domain)
                    .await
                    .unwrap()
            }));
        }
    }
    for handle in handles {
        assert!(handle.await.unwrap().accepted);
    }

    for i in 0..4 {
        assert!(setup
            .phases
            .can_proceed_to_execution(dir.path(), &format!("Agent {}", i))
            .await
            .unwrap());
    }
}
