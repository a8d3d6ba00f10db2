//! Proposal lifecycle tests against a live manager with real timers

use std::sync::Arc;
use std::time::Duration;

use accord_consensus::{
    ConsensusConfig, ConsensusEvent, ConsensusManager, ProposalOptions,
};
use accord_core::{ConsensusStatus, ConsensusType, VoteDecision};
use serde_json::json;
use tokio::sync::broadcast;
use tokio::time::sleep;

fn manager() -> Arc<ConsensusManager> {
    Arc::new(ConsensusManager::new(ConsensusConfig::default()))
}

fn drain(events: &mut broadcast::Receiver<ConsensusEvent>) -> Vec<ConsensusEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

#[tokio::test]
async fn test_two_quick_approvals_reach_consensus_before_timeout() {
    let manager = manager();
    let mut events = manager.subscribe();

    let id = manager
        .create_proposal(
            "planner",
            ConsensusType::SimpleMajority,
            json!({ "task": "rebalance" }),
            ProposalOptions::default()
                .with_quorum(2)
                .with_timeout(Duration::from_millis(100)),
        )
        .await
        .unwrap();

    manager
        .cast_vote(&id, "worker-1", VoteDecision::Approve, None, None)
        .await
        .unwrap();
    let status = manager
        .cast_vote(&id, "worker-2", VoteDecision::Approve, None, None)
        .await
        .unwrap();
    assert_eq!(status, ConsensusStatus::Accepted);

    // Outlive the original deadline
    sleep(Duration::from_millis(200)).await;

    let events = drain(&mut events);
    let reached = events
        .iter()
        .filter(|e| matches!(e, ConsensusEvent::ConsensusReached { .. }))
        .count();
    assert_eq!(reached, 1);
    assert!(!events
        .iter()
        .any(|e| matches!(e, ConsensusEvent::TimeoutExpired { .. })));

    let proposal = manager.get_proposal(&id).await.unwrap();
    assert_eq!(proposal.status, ConsensusStatus::Accepted);
    assert_eq!(proposal.result.unwrap().breakdown.approve, 2.0);
}

#[tokio::test]
async fn test_timeout_without_quorum_expires() {
    let manager = manager();
    let mut events = manager.subscribe();

    let id = manager
        .create_proposal(
            "planner",
            ConsensusType::SuperMajority,
            json!(null),
            ProposalOptions::default()
                .with_quorum(3)
                .with_timeout(Duration::from_millis(50)),
        )
        .await
        .unwrap();
    manager
        .cast_vote(&id, "worker-1", VoteDecision::Approve, None, None)
        .await
        .unwrap();

    sleep(Duration::from_millis(150)).await;

    let proposal = manager.get_proposal(&id).await.unwrap();
    assert_eq!(proposal.status, ConsensusStatus::Expired);
    assert!(proposal.resolved_at.is_some());

    let events = drain(&mut events);
    assert!(events
        .iter()
        .any(|e| matches!(e, ConsensusEvent::TimeoutExpired { vote_count: 1, .. })));
    assert!(events.iter().any(|e| matches!(
        e,
        ConsensusEvent::ConsensusFailed { status: ConsensusStatus::Expired, .. }
    )));

    let late = manager
        .cast_vote(&id, "worker-2", VoteDecision::Approve, None, None)
        .await;
    assert!(late.is_err());
}

#[tokio::test]
async fn test_timeout_with_quorum_runs_final_evaluation() {
    let manager = manager();

    // Two abstentions satisfy quorum without being decisive
    let id = manager
        .create_proposal(
            "planner",
            ConsensusType::Unanimous,
            json!(null),
            ProposalOptions::default()
                .with_quorum(2)
                .with_timeout(Duration::from_millis(50)),
        )
        .await
        .unwrap();
    manager
        .cast_vote(&id, "a", VoteDecision::Abstain, None, None)
        .await
        .unwrap();
    manager
        .cast_vote(&id, "b", VoteDecision::Abstain, None, None)
        .await
        .unwrap();
    assert_eq!(
        manager.get_proposal(&id).await.unwrap().status,
        ConsensusStatus::Voting
    );

    sleep(Duration::from_millis(150)).await;
    assert_eq!(
        manager.get_proposal(&id).await.unwrap().status,
        ConsensusStatus::Rejected
    );
}

#[tokio::test]
async fn test_extension_postpones_timeout() {
    let manager = manager();
    let id = manager
        .create_proposal(
            "planner",
            ConsensusType::SimpleMajority,
            json!(null),
            ProposalOptions::default()
                .with_quorum(5)
                .with_timeout(Duration::from_millis(60)),
        )
        .await
        .unwrap();

    manager
        .extend_voting_deadline(&id, Duration::from_millis(300))
        .await
        .unwrap();
    sleep(Duration::from_millis(120)).await;
    assert_eq!(
        manager.get_proposal(&id).await.unwrap().status,
        ConsensusStatus::Voting
    );

    sleep(Duration::from_millis(400)).await;
    assert_eq!(
        manager.get_proposal(&id).await.unwrap().status,
        ConsensusStatus::Expired
    );
}

#[tokio::test]
async fn test_resolution_happens_once() {
    let manager = manager();
    let mut events = manager.subscribe();
    let id = manager
        .create_proposal(
            "planner",
            ConsensusType::SimpleMajority,
            json!(null),
            ProposalOptions::default()
                .with_quorum(1)
                .with_timeout(Duration::from_millis(50)),
        )
        .await
        .unwrap();

    manager
        .cast_vote(&id, "a", VoteDecision::Reject, None, None)
        .await
        .unwrap();
    assert!(manager.withdraw_proposal(&id, "planner").await.is_err());
    sleep(Duration::from_millis(120)).await;

    let resolved = drain(&mut events)
        .into_iter()
        .filter(|e| matches!(e, ConsensusEvent::ProposalResolved { .. }))
        .count();
    assert_eq!(resolved, 1);
    assert_eq!(
        manager.get_proposal(&id).await.unwrap().status,
        ConsensusStatus::Rejected
    );
}

#[tokio::test]
async fn test_super_majority_two_thirds() {
    let manager = manager();
    let id = manager
        .create_proposal(
            "planner",
            ConsensusType::SuperMajority,
            json!(null),
            ProposalOptions::default().with_quorum(3),
        )
        .await
        .unwrap();

    manager.cast_vote(&id, "a", VoteDecision::Approve, None, None).await.unwrap();
    manager.cast_vote(&id, "b", VoteDecision::Approve, None, None).await.unwrap();
    let status = manager
        .cast_vote(&id, "c", VoteDecision::Reject, None, None)
        .await
        .unwrap();
    assert_eq!(status, ConsensusStatus::Accepted);
}

#[tokio::test]
async fn test_unanimous_single_reject_fails() {
    let manager = manager();
    let id = manager
        .create_proposal(
            "planner",
            ConsensusType::Unanimous,
            json!(null),
            ProposalOptions::default().with_quorum(3),
        )
        .await
        .unwrap();

    manager.cast_vote(&id, "a", VoteDecision::Approve, None, None).await.unwrap();
    manager.cast_vote(&id, "b", VoteDecision::Approve, None, None).await.unwrap();
    let status = manager
        .cast_vote(&id, "c", VoteDecision::Reject, None, None)
        .await
        .unwrap();
    assert_eq!(status, ConsensusStatus::Rejected);
}

#[tokio::test]
async fn test_weighted_votes_decide() {
    let manager = manager();
    let id = manager
        .create_proposal(
            "planner",
            ConsensusType::Weighted,
            json!(null),
            ProposalOptions::default().with_quorum(3),
        )
        .await
        .unwrap();

    manager.cast_vote(&id, "lead", VoteDecision::Approve, None, Some(5.0)).await.unwrap();
    manager.cast_vote(&id, "b", VoteDecision::Reject, None, Some(1.0)).await.unwrap();
    let status = manager
        .cast_vote(&id, "c", VoteDecision::Reject, None, Some(1.0))
        .await
        .unwrap();
    assert_eq!(status, ConsensusStatus::Accepted);

    let metrics = manager.get_metrics().await;
    assert_eq!(metrics.successful_proposals, 1);
    assert_eq!(metrics.total_votes_cast, 3);
}

#[tokio::test]
async fn test_dropped_manager_leaves_timers_harmless() {
    let manager = manager();
    manager
        .create_proposal(
            "planner",
            ConsensusType::SimpleMajority,
            json!(null),
            ProposalOptions::default().with_timeout(Duration::from_millis(20)),
        )
        .await
        .unwrap();
    drop(manager);
    sleep(Duration::from_millis(60)).await;
}
