//! Integration tests for the assembled TeoCoin service
//!
//! Cover the cross-component flows: ledger + withdrawals + rail, signed
//! redemptions + absorption, expiry, concurrency and persistence.

use chrono::{Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use teo_core::ports::{
    InMemoryDirectory, MockPaymentRail, RecordingEnrollment, RecordingNotifier,
};
use teo_core::withdrawal::ProcessOutcome;
use teo_core::{
    AbsorptionChoice, AbsorptionStatus, AuditContext, AuthorizedCall, Clock, CourseId, ExecutionOutcome,
    ManualClock, NotificationCategory, OpportunityRequest, TeoConfig, TeoError, TeoService,
    TransactionKind, UserId, WithdrawalStatus,
};
use teo_signer::{AuthorizationRequest, AuthorizedOperation, LocalSigner};

const DESTINATION: &str = "0x2222222222222222222222222222222222222222";

struct Harness {
    service: TeoService,
    clock: Arc<ManualClock>,
    rail: Arc<MockPaymentRail>,
    notifier: Arc<RecordingNotifier>,
    directory: Arc<InMemoryDirectory>,
    enrollment: Arc<RecordingEnrollment>,
}

async fn harness_with(config: TeoConfig) -> Harness {
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap()));
    let rail = Arc::new(MockPaymentRail::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let directory = Arc::new(InMemoryDirectory::new());
    let enrollment = Arc::new(RecordingEnrollment::new());

    let service = TeoService::builder()
        .config(config)
        .clock(clock.clone())
        .payment_rail(rail.clone())
        .notifier(notifier.clone())
        .directory(directory.clone())
        .enrollment(enrollment.clone())
        .build()
        .await
        .unwrap();

    Harness {
        service,
        clock,
        rail,
        notifier,
        directory,
        enrollment,
    }
}

async fn harness() -> Harness {
    harness_with(TeoConfig::test()).await
}

async fn fund(h: &Harness, user: &UserId, amount: i64) {
    h.service
        .ledger()
        .credit(user, Decimal::new(amount, 0), TransactionKind::Earned, "lesson reward", None)
        .await
        .unwrap();
}

fn opportunity_request(teo_used: i64) -> OpportunityRequest {
    OpportunityRequest {
        student: UserId::new("student"),
        teacher: UserId::new("teacher"),
        course: CourseId(42),
        course_price: Decimal::new(100, 0),
        discount_percentage: 10,
        teo_used: Decimal::new(teo_used, 0),
        discount_amount: Decimal::new(10, 0),
    }
}

fn sign(h: &Harness, signer: &LocalSigner, operation: AuthorizedOperation, nonce: u64) -> AuthorizationRequest {
    let deadline = (h.clock.now().timestamp() + 300) as u64;
    let hash = h
        .service
        .authorizer()
        .build_message(&operation, signer.address(), nonce, deadline)
        .unwrap();
    AuthorizationRequest {
        actor: signer.address(),
        operation,
        nonce,
        deadline,
        signature: signer.sign(&hash).unwrap().to_hex(),
    }
}

// ============ Scenarios ============

#[tokio::test]
async fn scenario_a_debit_for_discount() {
    let h = harness().await;
    let user = UserId::new("alice");
    fund(&h, &user, 100).await;

    let available = h
        .service
        .ledger()
        .debit(&user, Decimal::new(30, 0), TransactionKind::SpentDiscount, "course discount", Some(CourseId(1)))
        .await
        .unwrap();

    assert_eq!(available, Decimal::new(70, 0));
    let log = h.service.ledger().transactions(&user, 10).await.unwrap();
    let debits: Vec<_> = log.iter().filter(|tx| tx.kind == TransactionKind::SpentDiscount).collect();
    assert_eq!(debits.len(), 1);
    assert_eq!(debits[0].amount, Decimal::new(30, 0));
    assert_eq!(debits[0].available_after, Decimal::new(70, 0));
}

#[tokio::test]
async fn scenario_b_withdraw_then_cancel() {
    let h = harness().await;
    let user = UserId::new("alice");
    fund(&h, &user, 70).await;

    let request = h
        .service
        .withdrawals()
        .create_request(&user, Decimal::new(50, 0), DESTINATION, AuditContext::default())
        .await
        .unwrap();
    let balance = h.service.ledger().balance(&user).await.unwrap();
    assert_eq!(balance.available, Decimal::new(20, 0));
    assert_eq!(balance.pending_withdrawal, Decimal::new(50, 0));

    let cancelled = h.service.withdrawals().cancel(&request.id, &user).await.unwrap();
    assert_eq!(cancelled.status, WithdrawalStatus::Cancelled);
    let balance = h.service.ledger().balance(&user).await.unwrap();
    assert_eq!(balance.available, Decimal::new(70, 0));
    assert_eq!(balance.pending_withdrawal, Decimal::ZERO);
    assert!(h.rail.transfers().await.is_empty());
}

#[tokio::test]
async fn scenario_c_absorb_credits_option_b() {
    let h = harness().await;
    let teacher = UserId::new("teacher");

    let opportunity = h.service.absorption().open_opportunity(opportunity_request(10)).await.unwrap();
    assert_eq!(opportunity.commission_rate, Decimal::new(50, 2));
    assert_eq!(opportunity.option_a.teacher_eur, Decimal::new(45, 0));
    assert_eq!(opportunity.option_a.platform_eur, Decimal::new(45, 0));
    assert_eq!(opportunity.option_b.teacher_teo, Decimal::new(125, 1));
    assert_eq!(opportunity.option_b.platform_eur, Decimal::new(90, 0));

    let decided = h
        .service
        .absorption()
        .decide(&opportunity.id, &teacher, AbsorptionChoice::Absorb)
        .await
        .unwrap();
    assert_eq!(decided.status, AbsorptionStatus::Absorbed);

    let balance = h.service.ledger().balance(&teacher).await.unwrap();
    assert_eq!(balance.available, Decimal::new(125, 1));
    let log = h.service.ledger().transactions(&teacher, 10).await.unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].kind, TransactionKind::DiscountAbsorption);
    assert_eq!(log[0].reference.as_deref(), Some(opportunity.id.as_str()));
    assert_eq!(h.notifier.sent_with(NotificationCategory::AbsorptionAbsorbed).await.len(), 1);
}

#[tokio::test]
async fn scenario_d_sweep_after_window() {
    let h = harness().await;
    let teacher = UserId::new("teacher");

    let opportunity = h.service.absorption().open_opportunity(opportunity_request(10)).await.unwrap();
    assert_eq!(opportunity.expires_at - opportunity.created_at, Duration::hours(24));

    h.clock.set(opportunity.expires_at);
    assert_eq!(h.service.absorption().sweep_expired().await.unwrap(), 0);

    h.clock.set(opportunity.expires_at + Duration::seconds(1));
    assert_eq!(h.service.absorption().sweep_expired().await.unwrap(), 1);

    let expired = h.service.absorption().get(&opportunity.id).await.unwrap();
    assert_eq!(expired.status, AbsorptionStatus::Expired);
    assert!(h.service.ledger().transactions(&teacher, 10).await.unwrap().is_empty());
    assert_eq!(h.service.ledger().balance(&teacher).await.unwrap().total, Decimal::ZERO);
    assert_eq!(h.notifier.sent_with(NotificationCategory::AbsorptionExpired).await.len(), 1);

    let err = h
        .service
        .absorption()
        .decide(&opportunity.id, &teacher, AbsorptionChoice::Absorb)
        .await
        .unwrap_err();
    assert!(matches!(err, TeoError::Forbidden { .. }));
}

#[tokio::test]
async fn scenario_e_sixth_daily_request_rejected() {
    let h = harness().await;
    let user = UserId::new("alice");
    fund(&h, &user, 1000).await;

    for _ in 0..5 {
        let request = h
            .service
            .withdrawals()
            .create_request(&user, Decimal::new(10, 0), DESTINATION, AuditContext::default())
            .await
            .unwrap();
        h.service.withdrawals().cancel(&request.id, &user).await.unwrap();
    }

    let before = h.service.ledger().balance(&user).await.unwrap();
    let err = h
        .service
        .withdrawals()
        .create_request(&user, Decimal::new(10, 0), DESTINATION, AuditContext::default())
        .await
        .unwrap_err();
    match err {
        TeoError::LimitExceeded { limit, resets_at, .. } => {
            assert_eq!(limit, "max_daily_requests");
            assert_eq!(resets_at, Some(Utc.with_ymd_and_hms(2026, 3, 11, 0, 0, 0).unwrap()));
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(h.service.ledger().balance(&user).await.unwrap(), before);

    h.clock.set(Utc.with_ymd_and_hms(2026, 3, 11, 0, 0, 1).unwrap());
    h.service
        .withdrawals()
        .create_request(&user, Decimal::new(10, 0), DESTINATION, AuditContext::default())
        .await
        .unwrap();
}

// ============ Withdrawal Lifecycle ============

#[tokio::test]
async fn completion_removes_value_and_failure_returns_it() {
    let h = harness().await;
    let user = UserId::new("alice");
    fund(&h, &user, 100).await;

    let first = h
        .service
        .withdrawals()
        .create_request(&user, Decimal::new(30, 0), DESTINATION, AuditContext::default())
        .await
        .unwrap();
    match h.service.processor().process_one(&first.id).await.unwrap() {
        ProcessOutcome::Completed(request) => {
            assert_eq!(request.status, WithdrawalStatus::Completed);
            assert!(request.transaction_hash.is_some());
        }
        other => panic!("unexpected {:?}", other),
    }
    let balance = h.service.ledger().balance(&user).await.unwrap();
    assert_eq!(balance.total, Decimal::new(70, 0));

    h.rail.fail_next(1);
    let second = h
        .service
        .withdrawals()
        .create_request(&user, Decimal::new(20, 0), DESTINATION, AuditContext::default())
        .await
        .unwrap();
    match h.service.processor().process_one(&second.id).await.unwrap() {
        ProcessOutcome::Failed(request) => {
            assert_eq!(request.status, WithdrawalStatus::Failed);
            assert!(request.error_message.is_some());
        }
        other => panic!("unexpected {:?}", other),
    }
    let balance = h.service.ledger().balance(&user).await.unwrap();
    assert_eq!(balance.available, Decimal::new(70, 0));
    assert_eq!(balance.pending_withdrawal, Decimal::ZERO);
    assert_eq!(balance.total, Decimal::new(70, 0));

    assert_eq!(h.notifier.sent_with(NotificationCategory::WithdrawalCompleted).await.len(), 1);
    assert_eq!(h.notifier.sent_with(NotificationCategory::WithdrawalFailed).await.len(), 1);

    let kinds: Vec<_> = h
        .service
        .ledger()
        .transactions(&user, 10)
        .await
        .unwrap()
        .into_iter()
        .map(|tx| tx.kind)
        .collect();
    assert!(kinds.contains(&TransactionKind::WithdrawalCompleted));
    assert!(kinds.contains(&TransactionKind::WithdrawalFailed));
}

#[tokio::test]
async fn repeated_completion_is_idempotent() {
    let h = harness().await;
    let user = UserId::new("alice");
    fund(&h, &user, 100).await;

    let request = h
        .service
        .withdrawals()
        .create_request(&user, Decimal::new(40, 0), DESTINATION, AuditContext::default())
        .await
        .unwrap();
    h.service.processor().process_one(&request.id).await.unwrap();
    let completed = h.service.withdrawals().get(&request.id).await.unwrap();
    let receipt = teo_core::RailReceipt::new(completed.transaction_hash.clone().unwrap());

    let again = h.service.withdrawals().complete(&request.id, receipt).await.unwrap();
    assert_eq!(again.status, WithdrawalStatus::Completed);
    let balance = h.service.ledger().balance(&user).await.unwrap();
    assert_eq!(balance.total, Decimal::new(60, 0));
    assert_eq!(h.rail.transfers().await.len(), 1);
}

#[tokio::test]
async fn cancel_after_processing_started_is_rejected() {
    let h = harness().await;
    let user = UserId::new("alice");
    fund(&h, &user, 100).await;

    let request = h
        .service
        .withdrawals()
        .create_request(&user, Decimal::new(40, 0), DESTINATION, AuditContext::default())
        .await
        .unwrap();
    h.service.withdrawals().begin_processing(&request.id).await.unwrap();

    let err = h.service.withdrawals().cancel(&request.id, &user).await.unwrap_err();
    assert!(matches!(err, TeoError::CannotCancel { .. }));

    let err = h
        .service
        .withdrawals()
        .cancel(&request.id, &UserId::new("mallory"))
        .await
        .unwrap_err();
    assert!(matches!(err, TeoError::Forbidden { .. }));
}

#[tokio::test]
async fn interrupted_processing_is_recovered_after_threshold() {
    let h = harness().await;
    let user = UserId::new("alice");
    fund(&h, &user, 50).await;

    let request = h
        .service
        .withdrawals()
        .create_request(&user, Decimal::new(50, 0), DESTINATION, AuditContext::default())
        .await
        .unwrap();
    h.service.withdrawals().begin_processing(&request.id).await.unwrap();

    for _ in 0..3 {
        assert_eq!(h.service.processor().process_pending(100).await.unwrap().picked, 0);
    }
    let balance = h.service.ledger().balance(&user).await.unwrap();
    assert_eq!(balance.pending_withdrawal, Decimal::new(50, 0));

    let threshold = Duration::seconds(h.service.config().runner.stale_processing_secs as i64);
    h.clock.advance(threshold + Duration::seconds(1));
    let report = h.service.processor().recover_stale(threshold, 100).await.unwrap();
    assert_eq!(report.completed, vec![request.id.clone()]);

    let stored = h.service.withdrawals().get(&request.id).await.unwrap();
    assert_eq!(stored.status, WithdrawalStatus::Completed);
    let balance = h.service.ledger().balance(&user).await.unwrap();
    assert_eq!(balance.pending_withdrawal, Decimal::ZERO);
    assert_eq!(balance.total, Decimal::ZERO);
    assert_eq!(h.rail.transfers().await.len(), 1);
}

// ============ Signed Operations ============

#[tokio::test]
async fn signed_redemption_opens_negotiation() {
    let h = harness().await;
    let student_key = LocalSigner::from_bytes(&[0x21; 32]).unwrap();
    let teacher_key = LocalSigner::from_bytes(&[0x22; 32]).unwrap();
    let student = UserId::new("student");
    let teacher = UserId::new("teacher");
    h.directory.link(student.clone(), student_key.address()).await;
    h.directory.link(teacher.clone(), teacher_key.address()).await;
    fund(&h, &student, 50).await;

    let operation = AuthorizedOperation::DiscountRedemption {
        teacher: teacher_key.address(),
        course_id: 42,
        course_price: Decimal::new(100, 0),
        discount_percentage: 15,
        teo_cost: Decimal::new(15, 0),
    };
    let call = AuthorizedCall::new(student.clone(), sign(&h, &student_key, operation, 1))
        .with_teacher(teacher.clone());
    let result = h.service.executor().execute_authorized_operation(&call).await.unwrap();

    let opportunity = match result.outcome {
        ExecutionOutcome::DiscountRedeemed {
            student_available,
            opportunity,
        } => {
            assert_eq!(student_available, Decimal::new(35, 0));
            opportunity
        }
        other => panic!("unexpected {:?}", other),
    };
    assert_eq!(opportunity.discount_amount, Decimal::new(15, 0));
    assert_eq!(h.enrollment.redemptions().await.len(), 1);
    assert_eq!(h.service.absorption().pending_for_teacher(&teacher).await.unwrap().len(), 1);
    assert_eq!(h.notifier.sent_with(NotificationCategory::AbsorptionOpportunity).await.len(), 1);

    h.service
        .absorption()
        .decide(&opportunity.id, &teacher, AbsorptionChoice::Refuse)
        .await
        .unwrap();
    assert_eq!(h.service.ledger().balance(&teacher).await.unwrap().total, Decimal::ZERO);
}

#[tokio::test]
async fn signed_stake_moves_tier() {
    let h = harness().await;
    let key = LocalSigner::from_bytes(&[0x23; 32]).unwrap();
    let teacher = UserId::new("teacher");
    h.directory.link(teacher.clone(), key.address()).await;
    fund(&h, &teacher, 400).await;

    let stake = AuthorizedOperation::Stake {
        amount: Decimal::new(300, 0),
    };
    let call = AuthorizedCall::new(teacher.clone(), sign(&h, &key, stake, 1));
    h.service.executor().execute_authorized_operation(&call).await.unwrap();

    let tier = h.service.ledger().tier_for(&teacher).await.unwrap();
    assert_eq!(tier.commission_rate, Decimal::new(38, 2));

    let opportunity = h.service.absorption().open_opportunity(opportunity_request(10)).await.unwrap();
    assert_eq!(opportunity.commission_rate, Decimal::new(38, 2));
    assert_eq!(opportunity.option_a.teacher_eur, Decimal::new(558, 1));

    let unstake = AuthorizedOperation::Unstake {
        amount: Decimal::new(300, 0),
    };
    let call = AuthorizedCall::new(teacher.clone(), sign(&h, &key, unstake, 2));
    h.service.executor().execute_authorized_operation(&call).await.unwrap();

    let stored = h.service.absorption().get(&opportunity.id).await.unwrap();
    assert_eq!(stored.commission_rate, Decimal::new(38, 2));
}

#[tokio::test]
async fn concurrent_replays_execute_once() {
    let h = Arc::new(harness().await);
    let key = LocalSigner::from_bytes(&[0x24; 32]).unwrap();
    let user = UserId::new("alice");
    h.directory.link(user.clone(), key.address()).await;
    fund(&h, &user, 100).await;

    let stake = AuthorizedOperation::Stake {
        amount: Decimal::new(10, 0),
    };
    let call = AuthorizedCall::new(user.clone(), sign(&h, &key, stake, 9));

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let h = h.clone();
        let call = call.clone();
        tasks.push(tokio::spawn(async move {
            h.service.executor().execute_authorized_operation(&call).await
        }));
    }

    let mut ok = 0;
    let mut replayed = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => ok += 1,
            Err(TeoError::Replayed { .. }) => replayed += 1,
            Err(e) => panic!("unexpected {:?}", e),
        }
    }
    assert_eq!(ok, 1);
    assert_eq!(replayed, 7);
    assert_eq!(h.service.ledger().balance(&user).await.unwrap().staked, Decimal::new(10, 0));
}

// ============ Concurrency ============

#[tokio::test]
async fn concurrent_debits_never_overspend() {
    let h = Arc::new(harness().await);
    let user = UserId::new("alice");
    fund(&h, &user, 100).await;

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let h = h.clone();
        let user = user.clone();
        tasks.push(tokio::spawn(async move {
            h.service
                .ledger()
                .debit(&user, Decimal::new(60, 0), TransactionKind::SpentDiscount, "discount", None)
                .await
        }));
    }

    let mut ok = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => ok += 1,
            Err(e) => assert!(matches!(e, TeoError::InsufficientBalance { .. })),
        }
    }
    assert_eq!(ok, 1);
    let balance = h.service.ledger().balance(&user).await.unwrap();
    assert_eq!(balance.available, Decimal::new(40, 0));
}

#[tokio::test]
async fn concurrent_withdrawal_requests_respect_balance() {
    let h = Arc::new(harness().await);
    let user = UserId::new("alice");
    fund(&h, &user, 100).await;

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let h = h.clone();
        let user = user.clone();
        tasks.push(tokio::spawn(async move {
            h.service
                .withdrawals()
                .create_request(&user, Decimal::new(40, 0), DESTINATION, AuditContext::default())
                .await
        }));
    }

    let mut ok = 0;
    for task in tasks {
        if task.await.unwrap().is_ok() {
            ok += 1;
        }
    }
    assert_eq!(ok, 2);
    let balance = h.service.ledger().balance(&user).await.unwrap();
    assert_eq!(balance.available, Decimal::new(20, 0));
    assert_eq!(balance.pending_withdrawal, Decimal::new(80, 0));
    assert_eq!(balance.total, Decimal::new(100, 0));
}

#[tokio::test]
async fn concurrent_decisions_resolve_once() {
    let h = Arc::new(harness().await);
    let teacher = UserId::new("teacher");
    let opportunity = h.service.absorption().open_opportunity(opportunity_request(10)).await.unwrap();

    let mut tasks = Vec::new();
    for _ in 0..6 {
        let h = h.clone();
        let teacher = teacher.clone();
        let id = opportunity.id.clone();
        tasks.push(tokio::spawn(async move {
            h.service
                .absorption()
                .decide(&id, &teacher, AbsorptionChoice::Absorb)
                .await
        }));
    }

    let mut ok = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => ok += 1,
            Err(e) => assert!(matches!(e, TeoError::Forbidden { .. })),
        }
    }
    assert_eq!(ok, 1);
    assert_eq!(h.service.ledger().balance(&teacher).await.unwrap().available, Decimal::new(125, 1));
}

#[tokio::test]
async fn late_decision_racing_sweep_never_credits() {
    let h = Arc::new(harness().await);
    let teacher = UserId::new("teacher");
    let opportunity = h.service.absorption().open_opportunity(opportunity_request(10)).await.unwrap();
    h.clock.set(opportunity.expires_at + Duration::seconds(1));

    let decide = {
        let h = h.clone();
        let teacher = teacher.clone();
        let id = opportunity.id.clone();
        tokio::spawn(async move {
            h.service
                .absorption()
                .decide(&id, &teacher, AbsorptionChoice::Absorb)
                .await
        })
    };
    let sweep = {
        let h = h.clone();
        tokio::spawn(async move { h.service.absorption().sweep_expired().await })
    };

    let decided = decide.await.unwrap();
    let swept = sweep.await.unwrap().unwrap();
    match decided {
        Err(TeoError::Expired { .. }) => assert_eq!(swept, 0),
        Err(TeoError::Forbidden { .. }) => assert_eq!(swept, 1),
        other => panic!("unexpected {:?}", other),
    }

    let stored = h.service.absorption().get(&opportunity.id).await.unwrap();
    assert_eq!(stored.status, AbsorptionStatus::Expired);
    assert_eq!(h.service.ledger().balance(&teacher).await.unwrap().total, Decimal::ZERO);
}

// ============ Persistence ============

#[tokio::test]
async fn sled_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = TeoConfig::test();
    config.storage.data_dir = dir.path().to_string_lossy().to_string();
    let user = UserId::new("alice");

    let request_id = {
        let h = harness_with(config.clone()).await;
        fund(&h, &user, 100).await;
        let request = h
            .service
            .withdrawals()
            .create_request(&user, Decimal::new(25, 0), DESTINATION, AuditContext::default())
            .await
            .unwrap();
        request.id
    };

    let h = harness_with(config).await;
    let balance = h.service.ledger().balance(&user).await.unwrap();
    assert_eq!(balance.available, Decimal::new(75, 0));
    assert_eq!(balance.pending_withdrawal, Decimal::new(25, 0));

    let request = h.service.withdrawals().get(&request_id).await.unwrap();
    assert_eq!(request.status, WithdrawalStatus::Pending);

    let report = h.service.processor().process_pending(10).await.unwrap();
    assert_eq!(report.completed_count(), 1);
    assert_eq!(h.service.ledger().balance(&user).await.unwrap().total, Decimal::new(75, 0));
}
