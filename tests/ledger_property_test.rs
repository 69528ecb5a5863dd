mod common;

use common::Harness;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rust_decimal::Decimal;
use tutorpay::application::withdrawals::WithdrawRequest;
use tutorpay::domain::context::RequestContext;
use tutorpay::domain::money::{Amount, Balance};
use tutorpay::domain::withdrawal::NewBankAccount;
use tutorpay::error::EngineError;
use uuid::Uuid;

#[tokio::test]
async fn test_random_deposits_and_withdrawals_keep_ledger_consistent() {
    let h = Harness::new();
    let admin = RequestContext::admin(Uuid::new_v4());
    let mut rng = StdRng::seed_from_u64(7);

    let users: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
    let mut accounts = Vec::new();
    for user in &users {
        let account = h
            .engine
            .withdrawals()
            .add_bank_account(
                &RequestContext::teacher(*user),
                NewBankAccount {
                    account_title: "Payout".to_string(),
                    account_number: "00998877".to_string(),
                    bank_name: "Meezan".to_string(),
                    iban: None,
                    is_primary: true,
                },
            )
            .await
            .unwrap();
        accounts.push(account.id);
    }

    let mut expected = vec![0i64; users.len()];
    let mut pending = Vec::new();
    for _ in 0..200 {
        h.clock.advance(chrono::Duration::seconds(1));
        let i = rng.gen_range(0..users.len());
        let ctx = RequestContext::teacher(users[i]);
        match rng.gen_range(0..4) {
            0 => {
                let rupees: i64 = rng.gen_range(1..500);
                h.fund(users[i], Decimal::from(rupees)).await;
                expected[i] += rupees * 100;
            }
            1 => {
                let rupees: i64 = rng.gen_range(1..300);
                let result = h
                    .engine
                    .withdrawals()
                    .request_withdrawal(
                        &ctx,
                        WithdrawRequest {
                            bank_account_id: accounts[i],
                            amount: Amount::new(rupees * 100).unwrap(),
                        },
                    )
                    .await;
                match result {
                    Ok(request) => pending.push((i, request.id, rupees * 100)),
                    Err(EngineError::InsufficientFunds { .. }) => {}
                    Err(e) => panic!("unexpected error: {e}"),
                }
            }
            2 if !pending.is_empty() => {
                let (owner, id, minor) = pending.swap_remove(rng.gen_range(0..pending.len()));
                h.engine.withdrawals().approve(&admin, id).await.unwrap();
                expected[owner] -= minor;
            }
            3 if !pending.is_empty() => {
                let (_, id, _) = pending.swap_remove(rng.gen_range(0..pending.len()));
                h.engine.withdrawals().reject(&admin, id).await.unwrap();
            }
            _ => {}
        }

        let summary = h.engine.ledger().wallet(&ctx).await.unwrap();
        assert!(!summary.available.is_negative(), "{summary:?}");
    }

    for check in h.engine.ledger().verify_all().await.unwrap() {
        assert!(check.is_consistent(), "{check:?}");
    }
    for (i, user) in users.iter().enumerate() {
        let summary = h
            .engine
            .ledger()
            .wallet(&RequestContext::teacher(*user))
            .await
            .unwrap();
        assert_eq!(summary.wallet.balance, Balance::new(expected[i]));
        let held: i64 = pending
            .iter()
            .filter(|(owner, _, _)| *owner == i)
            .map(|(_, _, minor)| minor)
            .sum();
        assert_eq!(summary.held, Balance::new(held));
    }
}
