//! Property tests for the store's balance invariants

use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;

use settlement_core::{
    AccountId, Amount, Channel, Config, Currency, PrincipalId, Store, TransferPlan,
};

const ACCOUNT_IDS: [&str; 3] = ["acc-a", "acc-b", "acc-c"];
const INITIAL_MINOR: u64 = 100_000;

fn seeded_store() -> (Arc<Store>, tempfile::TempDir) {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.data_dir = temp_dir.path().to_path_buf();

    let store = Arc::new(Store::open(&config).unwrap());
    for (i, id) in ACCOUNT_IDS.iter().enumerate() {
        let now = chrono::Utc::now();
        store
            .create_account(settlement_core::Account {
                account_id: AccountId::new(*id),
                owner: PrincipalId::new(format!("worker-{}", i)),
                balance: Amount::from_minor(INITIAL_MINOR),
                currency: Currency::INR,
                default_account: true,
                verified: true,
                created_at: now,
                updated_at: now,
            })
            .unwrap();
    }
    (store, temp_dir)
}

fn plan(sender: usize, receiver: usize, amount: u64) -> TransferPlan {
    TransferPlan {
        transfer_id: uuid::Uuid::now_v7(),
        sender: Some(AccountId::new(ACCOUNT_IDS[sender])),
        receiver: AccountId::new(ACCOUNT_IDS[receiver]),
        amount: Amount::from_minor(amount),
        currency: Currency::INR,
        channel: Channel::Manual,
        consume_token: None,
        metadata: HashMap::new(),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    // Internal transfers are zero-sum regardless of how many succeed or
    // get rejected along the way.
    #[test]
    fn internal_transfers_preserve_total_balance(
        ops in prop::collection::vec((0usize..3, 0usize..3, 0u64..200_000), 1..40)
    ) {
        let (store, _dir) = seeded_store();
        let initial = store.total_balance().unwrap();

        for (sender, receiver, amount) in ops {
            // Rejections (zero amount, insufficient funds, self-directed
            // transfers) must also be zero-sum, so they stay in the mix.
            let _ = store.execute_transfer(plan(sender, receiver, amount));
        }

        prop_assert_eq!(store.total_balance().unwrap(), initial);
    }

    // No sequence of transfers can overdraw an account.
    #[test]
    fn balances_never_exceed_the_money_supply(
        ops in prop::collection::vec((0usize..3, 0usize..3, 1u64..150_000), 1..40)
    ) {
        let (store, _dir) = seeded_store();
        let supply = store.total_balance().unwrap();

        for (sender, receiver, amount) in ops {
            let _ = store.execute_transfer(plan(sender, receiver, amount));
        }

        for id in ACCOUNT_IDS {
            let balance = store.get_account(&AccountId::new(id)).unwrap().balance;
            prop_assert!(balance <= supply);
        }
    }

    // A failed transfer leaves both parties exactly as they were.
    #[test]
    fn rejected_transfers_have_no_effect(amount in 300_001u64..10_000_000) {
        let (store, _dir) = seeded_store();

        let err = store.execute_transfer(plan(0, 1, amount));
        prop_assert!(err.is_err());

        prop_assert_eq!(
            store.get_account(&AccountId::new("acc-a")).unwrap().balance,
            Amount::from_minor(INITIAL_MINOR)
        );
        prop_assert_eq!(
            store.get_account(&AccountId::new("acc-b")).unwrap().balance,
            Amount::from_minor(INITIAL_MINOR)
        );
    }
}
