mod common;

use common::Harness;
use rust_decimal_macros::dec;
use tutorpay::application::withdrawals::WithdrawRequest;
use tutorpay::domain::context::RequestContext;
use tutorpay::domain::ledger::EntryType;
use tutorpay::domain::money::{Amount, Balance};
use tutorpay::domain::payment::Provider;
use tutorpay::domain::withdrawal::{NewBankAccount, WithdrawalStatus};
use tutorpay::error::EngineError;
use uuid::Uuid;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_bookings_of_one_slot() {
    let h = Harness::new();
    let teacher = h.teacher(dec!(500)).await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = h.engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .sessions()
                .create_session(
                    &RequestContext::student(Uuid::new_v4()),
                    Harness::booking(teacher, 3, 15, dec!(1)),
                )
                .await
        }));
    }

    let mut booked = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => booked += 1,
            Err(EngineError::Conflict(_)) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(booked, 1);

    let teacher_sessions = h
        .engine
        .sessions()
        .sessions_for(&RequestContext::teacher(teacher))
        .await
        .unwrap();
    assert_eq!(teacher_sessions.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_withdrawals_cannot_overdraw() {
    let h = Harness::new();
    let user = Uuid::new_v4();
    let ctx = RequestContext::teacher(user);
    h.fund(user, dec!(1000)).await;
    let account = h
        .engine
        .withdrawals()
        .add_bank_account(
            &ctx,
            NewBankAccount {
                account_title: "Bilal Ahmed".to_string(),
                account_number: "00123456789".to_string(),
                bank_name: "HBL".to_string(),
                iban: None,
                is_primary: false,
            },
        )
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..2 {
        let engine = h.engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .withdrawals()
                .request_withdrawal(
                    &ctx,
                    WithdrawRequest {
                        bank_account_id: account.id,
                        amount: Amount::from_major(dec!(600)).unwrap(),
                    },
                )
                .await
        }));
    }

    let mut accepted = 0;
    let mut refused = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => accepted += 1,
            Err(EngineError::InsufficientFunds { .. }) => refused += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!((accepted, refused), (1, 1));

    let wallet = h.engine.ledger().wallet(&ctx).await.unwrap();
    assert_eq!(wallet.wallet.balance, Balance::new(100_000));
    assert_eq!(wallet.available, Balance::new(40_000));
    assert_eq!(wallet.held, Balance::new(60_000));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_duplicate_callbacks_credit_once() {
    let h = Harness::new();
    let user = Uuid::new_v4();
    let intent = h.deposit(user, dec!(250), Provider::Easypaisa).await;
    let callback = h
        .engine
        .gateway()
        .codec(intent.provider)
        .unwrap()
        .simulate_callback(&intent, "0000", "EP-9")
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..10 {
        let engine = h.engine.clone();
        let callback = callback.clone();
        handles.push(tokio::spawn(async move {
            engine.settlement().reconcile(callback).await
        }));
    }
    let mut fresh = 0;
    for handle in handles {
        let settlement = handle.await.unwrap().unwrap();
        if !settlement.replayed {
            fresh += 1;
        }
    }
    assert_eq!(fresh, 1);

    let ctx = RequestContext::student(user);
    assert_eq!(h.engine.ledger().transactions(&ctx).await.unwrap().len(), 1);
    assert_eq!(
        h.engine.ledger().wallet(&ctx).await.unwrap().wallet.balance,
        Balance::new(25_000)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_approve_and_reject_resolve_once() {
    let h = Harness::new();
    let admin = RequestContext::admin(Uuid::new_v4());
    let user = Uuid::new_v4();
    let ctx = RequestContext::teacher(user);
    h.fund(user, dec!(2000)).await;
    let account = h
        .engine
        .withdrawals()
        .add_bank_account(
            &ctx,
            NewBankAccount {
                account_title: "Bilal Ahmed".to_string(),
                account_number: "00123456789".to_string(),
                bank_name: "HBL".to_string(),
                iban: None,
                is_primary: true,
            },
        )
        .await
        .unwrap();

    let mut approved_total = 0i64;
    for _ in 0..10 {
        let request = h
            .engine
            .withdrawals()
            .request_withdrawal(
                &ctx,
                WithdrawRequest {
                    bank_account_id: account.id,
                    amount: Amount::from_major(dec!(100)).unwrap(),
                },
            )
            .await
            .unwrap();
        let id = request.id;

        let approve = {
            let engine = h.engine.clone();
            tokio::spawn(async move { engine.withdrawals().approve(&admin, id).await })
        };
        let reject = {
            let engine = h.engine.clone();
            tokio::spawn(async move { engine.withdrawals().reject(&admin, id).await })
        };

        let outcomes = [approve.await.unwrap(), reject.await.unwrap()];
        let winners: Vec<_> = outcomes.iter().filter_map(|o| o.as_ref().ok()).collect();
        assert_eq!(winners.len(), 1, "{outcomes:?}");
        assert!(
            outcomes
                .iter()
                .any(|o| matches!(o, Err(EngineError::State(_)))),
            "{outcomes:?}"
        );
        let winner = winners[0].status;

        let stored = h.engine.withdrawals().withdrawals(&ctx).await.unwrap();
        let stored = stored.iter().find(|w| w.id == id).unwrap();
        assert_eq!(stored.status, winner);

        let resolution: Vec<_> = h
            .engine
            .ledger()
            .transactions(&ctx)
            .await
            .unwrap()
            .into_iter()
            .filter(|e| e.related_entity_id == id && e.r#type != EntryType::Hold)
            .collect();
        match winner {
            WithdrawalStatus::Approved => {
                assert_eq!(resolution.len(), 2);
                approved_total += 10_000;
            }
            WithdrawalStatus::Rejected => assert_eq!(resolution.len(), 1),
            other => panic!("unexpected status {other:?}"),
        }
        assert!(resolution.iter().all(|e| e.batch_key == resolution[0].batch_key));
    }

    for check in h.engine.ledger().verify_all().await.unwrap() {
        assert!(check.is_consistent(), "{check:?}");
    }
    let summary = h.engine.ledger().wallet(&ctx).await.unwrap();
    assert_eq!(summary.wallet.balance, Balance::new(200_000 - approved_total));
    assert_eq!(summary.held, Balance::ZERO);
    assert_eq!(
        h.events
            .names()
            .iter()
            .filter(|name| **name == "withdrawal_resolved")
            .count(),
        10
    );
}
