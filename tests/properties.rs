use ballot_relay::integrity::{vote_hash, VoteHash, VoterAddress};
use ballot_relay::lifecycle::{self, ElectionStatus};
use ballot_relay::models::{Candidate, Election};
use ballot_relay::voting::compute_result;
use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;
use std::collections::HashMap;

fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
}

fn election_with(counts: &[u64]) -> (Election, HashMap<String, u64>) {
    let candidates: Vec<Candidate> = (0..counts.len())
        .map(|i| Candidate { id: format!("c{}", i), name: format!("Candidate {}", i), party: None })
        .collect();
    let tally = candidates.iter().zip(counts).map(|(c, n)| (c.id.clone(), *n)).collect();
    let election = Election {
        id: "prop".into(),
        title: "Property".into(),
        candidates,
        max_choices: 1,
        start_time: base(),
        end_time: base() + Duration::days(1),
    };
    (election, tally)
}

fn address() -> impl Strategy<Value = VoterAddress> {
    proptest::array::uniform20(any::<u8>())
        .prop_map(|bytes| VoterAddress::parse(&format!("0x{}", hex::encode(bytes))).unwrap())
}

proptest! {
    #[test]
    fn status_never_moves_backwards(start in 0i64..10_000, len in 1i64..10_000, a in -20_000i64..40_000, b in -20_000i64..40_000) {
        let start = base() + Duration::seconds(start);
        let end = start + Duration::seconds(len);
        let (early, late) = if a <= b { (a, b) } else { (b, a) };

        let first = lifecycle::status_at(base() + Duration::seconds(early), start, end);
        let second = lifecycle::status_at(base() + Duration::seconds(late), start, end);
        prop_assert!(first <= second);

        let p1 = lifecycle::progress_at(base() + Duration::seconds(early), start, end);
        let p2 = lifecycle::progress_at(base() + Duration::seconds(late), start, end);
        prop_assert!((0.0..=100.0).contains(&p1));
        prop_assert!(p1 <= p2);
    }

    #[test]
    fn exactly_one_status_holds(offset in -10_000i64..10_000, len in 1i64..5_000) {
        let start = base();
        let end = start + Duration::seconds(len);
        let now = start + Duration::seconds(offset);
        let expected = if now < start {
            ElectionStatus::Upcoming
        } else if now < end {
            ElectionStatus::Active
        } else {
            ElectionStatus::Ended
        };
        prop_assert_eq!(lifecycle::status_at(now, start, end), expected);
    }

    #[test]
    fn percentages_sum_to_one_hundred(counts in prop::collection::vec(0u64..10_000, 1..12)) {
        let (election, tally) = election_with(&counts);
        let result = compute_result(&election, &tally);

        let total: u64 = counts.iter().sum();
        prop_assert_eq!(result.total_votes, total);
        let sum: f64 = result.rows.iter().map(|r| r.percentage).sum();
        if total == 0 {
            prop_assert_eq!(sum, 0.0);
            prop_assert!(result.winners.is_empty());
        } else {
            // Each row rounds by at most 0.005
            prop_assert!((sum - 100.0).abs() <= 0.005 * counts.len() as f64 + 1e-9);
        }
    }

    #[test]
    fn winners_are_exactly_the_top_candidates(counts in prop::collection::vec(1u64..50, 1..10)) {
        let (election, tally) = election_with(&counts);
        let result = compute_result(&election, &tally);

        let max = *counts.iter().max().unwrap();
        let expected: Vec<String> = counts
            .iter()
            .enumerate()
            .filter(|(_, n)| **n == max)
            .map(|(i, _)| format!("c{}", i))
            .collect();
        prop_assert_eq!(result.winners, expected);
    }

    #[test]
    fn hash_is_deterministic_and_input_sensitive(
        election in "[a-z0-9-]{1,24}",
        payload in prop::collection::vec(any::<u8>(), 1..256),
        voter in address(),
        other in address(),
    ) {
        let h = vote_hash(&election, &payload, &voter);
        prop_assert_eq!(h, vote_hash(&election, &payload, &voter));
        prop_assert_eq!(h.to_string().parse::<VoteHash>().unwrap(), h);

        if other != voter {
            prop_assert_ne!(h, vote_hash(&election, &payload, &other));
        }
        let mut altered = payload.clone();
        altered[0] ^= 0x01;
        prop_assert_ne!(h, vote_hash(&election, &altered, &voter));
    }
}
