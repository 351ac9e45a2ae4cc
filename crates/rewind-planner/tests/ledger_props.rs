use proptest::prelude::*;
use rewind_planner::{ActionKey, InputDigest, Ledger, LostInputRecord};

fn record(owner: usize, digest: usize) -> LostInputRecord {
    LostInputRecord::new(
        ActionKey::new(format!("//pkg:a{owner}"), 0),
        InputDigest::new(format!("d{digest}")),
        format!("out/{digest}"),
    )
}

proptest! {
    #[test]
    fn prop_threshold_first_exceeded_at_limit(limit in 1u32..30, repeats in 1u32..40) {
        let ledger = Ledger::new(limit);
        let first_exceeded = (1..=repeats)
            .map(|_| ledger.record_loss(&record(0, 0)))
            .find(|&count| ledger.threshold_exceeded(count));

        if repeats >= limit {
            prop_assert_eq!(first_exceeded, Some(limit));
        } else {
            prop_assert_eq!(first_exceeded, None);
        }
    }

    #[test]
    fn prop_distinct_records_ignore_path(
        losses in proptest::collection::vec((0..5usize, 0..5usize), 0..60)
    ) {
        let ledger = Ledger::new(u32::MAX);
        let mut expected = std::collections::HashSet::new();
        for (owner, digest) in &losses {
            let mut rec = record(*owner, *digest);
            rec.path = format!("elsewhere/{}", losses.len());
            ledger.record_loss(&rec);
            expected.insert((*owner, *digest));
        }

        prop_assert_eq!(ledger.distinct_records(), expected.len());
        prop_assert_eq!(ledger.reset(), expected.len());
        prop_assert_eq!(ledger.distinct_records(), 0);
    }
}
