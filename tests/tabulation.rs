use ballot_relay::coordinator::{RetryPolicy, SubmissionResult, VoteCoordinator};
use ballot_relay::db::VoteQueue;
use ballot_relay::error::TallyError;
use ballot_relay::ledger::{InMemoryLedger, LedgerClient};
use ballot_relay::models::{Candidate, Election, VoteIntent};
use ballot_relay::voting::ResultsTabulator;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;

fn election() -> Election {
    let start = Utc::now() - Duration::hours(1);
    Election {
        id: "council-2026".into(),
        title: "Council".into(),
        candidates: vec![
            Candidate { id: "a".into(), name: "Ada".into(), party: None },
            Candidate { id: "b".into(), name: "Brook".into(), party: Some("Green".into()) },
            Candidate { id: "c".into(), name: "Cato".into(), party: None },
        ],
        max_choices: 1,
        start_time: start,
        end_time: start + Duration::days(1),
    }
}

#[tokio::test]
async fn tabulates_ledger_counts() {
    let ledger = Arc::new(InMemoryLedger::new());
    ledger.set_candidate_counts(
        "council-2026",
        HashMap::from([("a".to_string(), 10), ("b".to_string(), 10), ("c".to_string(), 5)]),
    );

    let result = ResultsTabulator::new(ledger).tabulate(&election()).await.unwrap();

    assert_eq!(result.total_votes, 25);
    assert_eq!(result.row("a").unwrap().percentage, 40.0);
    assert_eq!(result.row("b").unwrap().percentage, 40.0);
    assert_eq!(result.row("c").unwrap().percentage, 20.0);
    assert_eq!(result.winners, vec!["a".to_string(), "b".to_string()]);
}

#[tokio::test]
async fn confirmed_votes_show_up_in_results() {
    let ledger = Arc::new(InMemoryLedger::new());
    let queue = Arc::new(VoteQueue::open("sqlite::memory:").await.unwrap());
    let coordinator = VoteCoordinator::new(ledger.clone(), queue, RetryPolicy::default());

    let voters = [
        ("0x52908400098527886e0f7030069857d2e4169ee7", "a"),
        ("0x8617e340b3d01fa5f11f306f4090fd50e238070d", "c"),
        ("0xde709f2102306220921060314715629080e2fb77", "c"),
    ];
    for (voter, candidate) in voters {
        let intent = VoteIntent::new("council-2026", voter, b"sealed".to_vec()).with_candidate(candidate);
        assert!(matches!(coordinator.submit(&intent).await.unwrap(), SubmissionResult::Confirmed(_)));
    }

    assert_eq!(ledger.get_vote_count("council-2026").await.unwrap(), 3);
    let result = ResultsTabulator::new(ledger).tabulate(&election()).await.unwrap();
    assert_eq!(result.total_votes, 3);
    assert_eq!(result.row("b").unwrap().vote_count, 0);
    assert_eq!(result.winners, vec!["c".to_string()]);
}

#[tokio::test]
async fn unreachable_ledger_reports_unavailable() {
    let ledger = Arc::new(InMemoryLedger::new());
    ledger.set_offline(true);

    let err = ResultsTabulator::new(ledger).tabulate(&election()).await.unwrap_err();
    assert!(matches!(err, TallyError::Unavailable(_)));
    assert!(err.to_string().contains("temporarily unavailable"));
}
