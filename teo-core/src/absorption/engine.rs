//! Discount absorption engine
//!
//! Opportunity transitions run inside the teacher's account session, so a
//! decision and the expiry sweep cannot both resolve the same opportunity,
//! and the absorb credit lands in the same batch as the status change.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::AbsorptionConfig;
use crate::error::{TeoError, TeoResult};
use crate::ledger::{AccountSession, BalanceLedger, TransactionMeta};
use crate::ports::{notify_best_effort, NotificationCategory, Notifier};
use crate::types::{
    round_amount, validate_amount, AbsorptionChoice, AbsorptionOpportunity, AbsorptionStatus,
    CourseId, OpportunityId, OutcomeOption, TransactionKind, UserId,
};

/// Input for a new opportunity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpportunityRequest {
    pub student: UserId,
    pub teacher: UserId,
    pub course: CourseId,
    pub course_price: Decimal,
    pub discount_percentage: u32,
    pub teo_used: Decimal,
    pub discount_amount: Decimal,
}

impl OpportunityRequest {
    /// Check percentages, amounts and parties
    pub fn validate(&self) -> TeoResult<()> {
        if self.discount_percentage == 0 || self.discount_percentage > 100 {
            return Err(TeoError::invalid_amount(format!(
                "discount percentage {} is outside (0, 100]",
                self.discount_percentage
            )));
        }
        validate_amount(self.course_price)?;
        validate_amount(self.teo_used)?;
        validate_amount(self.discount_amount)?;
        if self.discount_amount > self.course_price {
            return Err(TeoError::invalid_amount(format!(
                "discount {} exceeds course price {}",
                self.discount_amount, self.course_price
            )));
        }
        if self.student == self.teacher {
            return Err(TeoError::InvalidState {
                reason: "teacher cannot absorb a discount on their own purchase".to_string(),
            });
        }
        Ok(())
    }
}

/// Compute both outcomes for a discounted sale
///
/// Option A keeps the fiat split at the commission rate. Option B gives the
/// platform the whole net price and pays the teacher the student's TEO plus
/// the bonus.
pub fn compute_options(
    course_price: Decimal,
    discount_amount: Decimal,
    teo_used: Decimal,
    commission_rate: Decimal,
    bonus_rate: Decimal,
) -> (OutcomeOption, OutcomeOption) {
    let net = course_price - discount_amount;
    let teacher_eur = net * (Decimal::ONE - commission_rate);
    let option_a = OutcomeOption {
        teacher_eur,
        platform_eur: net - teacher_eur,
        teacher_teo: Decimal::ZERO,
    };
    let option_b = OutcomeOption {
        teacher_eur: Decimal::ZERO,
        platform_eur: net,
        teacher_teo: round_amount(teo_used * (Decimal::ONE + bonus_rate)),
    };
    (option_a, option_b)
}

/// Discount absorption engine
pub struct AbsorptionEngine {
    ledger: Arc<BalanceLedger>,
    notifier: Arc<dyn Notifier>,
    decision_window: Duration,
    bonus_rate: Decimal,
}

impl AbsorptionEngine {
    pub fn new(ledger: Arc<BalanceLedger>, notifier: Arc<dyn Notifier>, config: &AbsorptionConfig) -> Self {
        Self {
            ledger,
            notifier,
            decision_window: Duration::hours(config.decision_window_hours),
            bonus_rate: config.bonus_rate,
        }
    }

    pub fn decision_window(&self) -> Duration {
        self.decision_window
    }

    /// Open a negotiation for the course's teacher
    pub async fn open_opportunity(&self, request: OpportunityRequest) -> TeoResult<AbsorptionOpportunity> {
        request.validate()?;

        let tier = self.ledger.tier_for(&request.teacher).await?;
        let (option_a, option_b) = compute_options(
            request.course_price,
            request.discount_amount,
            request.teo_used,
            tier.commission_rate,
            self.bonus_rate,
        );

        let mut session = self.ledger.open(&request.teacher).await?;
        let now = session.now();
        let opportunity = AbsorptionOpportunity {
            id: OpportunityId::generate(),
            teacher: request.teacher,
            student: request.student,
            course: request.course,
            course_price: request.course_price,
            discount_percentage: request.discount_percentage,
            teo_used_by_student: request.teo_used,
            discount_amount: request.discount_amount,
            teacher_tier: tier.tier,
            commission_rate: tier.commission_rate,
            option_a,
            option_b,
            status: AbsorptionStatus::Pending,
            created_at: now,
            expires_at: now + self.decision_window,
            decided_at: None,
        };
        session.put_opportunity(opportunity.clone());
        session.commit().await?;

        info!(
            opportunity_id = %opportunity.id,
            teacher = %opportunity.teacher,
            student = %opportunity.student,
            course = %opportunity.course,
            tier = %opportunity.teacher_tier,
            teacher_teo = %opportunity.option_b.teacher_teo,
            "absorption opportunity opened"
        );

        notify_best_effort(
            self.notifier.as_ref(),
            &opportunity.teacher,
            NotificationCategory::AbsorptionOpportunity,
            json!({
                "opportunity_id": opportunity.id.as_str(),
                "course_id": opportunity.course.0,
                "student": opportunity.student.as_str(),
                "option_a_teacher_eur": opportunity.option_a.teacher_eur.to_string(),
                "option_b_teacher_teo": opportunity.option_b.teacher_teo.to_string(),
                "expires_at": opportunity.expires_at.to_rfc3339(),
            }),
        )
        .await;

        Ok(opportunity)
    }

    /// Resolve by the teacher's choice
    pub async fn decide(
        &self,
        opportunity_id: &OpportunityId,
        teacher: &UserId,
        choice: AbsorptionChoice,
    ) -> TeoResult<AbsorptionOpportunity> {
        let existing = self.get(opportunity_id).await?;
        if &existing.teacher != teacher {
            warn!(opportunity_id = %opportunity_id, user = %teacher, "decision attempted by non-owner");
            return Err(TeoError::forbidden("absorption", opportunity_id.as_str(), teacher.as_str()));
        }

        let (mut session, mut opportunity) = self.lock_opportunity(opportunity_id, teacher).await?;
        if opportunity.status != AbsorptionStatus::Pending {
            debug!(opportunity_id = %opportunity_id, status = %opportunity.status, "decision on resolved opportunity");
            return Err(TeoError::forbidden("absorption", opportunity_id.as_str(), teacher.as_str()));
        }

        let now = session.now();
        if opportunity.is_past_deadline(now) {
            let expires_at = opportunity.expires_at;
            opportunity.expire(now)?;
            session.put_opportunity(opportunity.clone());
            session.commit().await?;
            info!(opportunity_id = %opportunity_id, "absorption opportunity expired on late decision");
            return Err(TeoError::Expired {
                id: opportunity_id.to_string(),
                expires_at,
            });
        }

        opportunity.resolve(choice, now)?;
        if choice == AbsorptionChoice::Absorb {
            session.credit(
                opportunity.option_b.teacher_teo,
                TransactionKind::DiscountAbsorption,
                format!("Absorbed discount for {}", opportunity.course),
                TransactionMeta::course(opportunity.course).with_reference(opportunity.id.as_str()),
            )?;
        }
        session.put_opportunity(opportunity.clone());
        session.commit().await?;

        info!(
            opportunity_id = %opportunity_id,
            teacher = %teacher,
            status = %opportunity.status,
            "absorption decided"
        );

        let category = match choice {
            AbsorptionChoice::Absorb => NotificationCategory::AbsorptionAbsorbed,
            AbsorptionChoice::Refuse => NotificationCategory::AbsorptionRefused,
        };
        notify_best_effort(
            self.notifier.as_ref(),
            &opportunity.student,
            category,
            json!({
                "opportunity_id": opportunity.id.as_str(),
                "course_id": opportunity.course.0,
                "status": opportunity.status.name(),
            }),
        )
        .await;

        Ok(opportunity)
    }

    /// Expire every pending opportunity past its window; returns the count
    pub async fn sweep_expired(&self) -> TeoResult<usize> {
        let now = self.ledger.clock().now();
        let candidates = self.ledger.store().list_expired_opportunities(now).await?;
        let mut expired = 0;

        for candidate in candidates {
            match self.expire_one(&candidate.id, &candidate.teacher).await {
                Ok(Some(opportunity)) => {
                    expired += 1;
                    self.notify_expired(&opportunity).await;
                }
                Ok(None) => {}
                Err(e) => warn!(opportunity_id = %candidate.id, error = %e, "expiry sweep error"),
            }
        }

        if expired > 0 {
            info!(expired, "absorption sweep finished");
        }
        Ok(expired)
    }

    /// Get an opportunity
    pub async fn get(&self, opportunity_id: &OpportunityId) -> TeoResult<AbsorptionOpportunity> {
        self.ledger
            .store()
            .get_opportunity(opportunity_id)
            .await?
            .ok_or_else(|| TeoError::not_found("absorption", opportunity_id.as_str()))
    }

    /// Pending opportunities of a teacher; stale ones are expired on the way
    pub async fn pending_for_teacher(&self, teacher: &UserId) -> TeoResult<Vec<AbsorptionOpportunity>> {
        let now = self.ledger.clock().now();
        let pending = self
            .ledger
            .store()
            .list_opportunities_for_teacher(teacher, Some(AbsorptionStatus::Pending))
            .await?;

        let mut live = Vec::with_capacity(pending.len());
        for opportunity in pending {
            if opportunity.is_past_deadline(now) {
                if let Some(expired) = self.expire_one(&opportunity.id, teacher).await? {
                    self.notify_expired(&expired).await;
                }
            } else {
                live.push(opportunity);
            }
        }
        Ok(live)
    }

    /// Expire under the teacher's lock if still pending and past deadline
    async fn expire_one(
        &self,
        opportunity_id: &OpportunityId,
        teacher: &UserId,
    ) -> TeoResult<Option<AbsorptionOpportunity>> {
        let (mut session, mut opportunity) = self.lock_opportunity(opportunity_id, teacher).await?;
        let now = session.now();
        if opportunity.status != AbsorptionStatus::Pending || !opportunity.is_past_deadline(now) {
            debug!(opportunity_id = %opportunity_id, status = %opportunity.status, "expiry skipped");
            return Ok(None);
        }
        opportunity.expire(now)?;
        session.put_opportunity(opportunity.clone());
        session.commit().await?;
        debug!(opportunity_id = %opportunity_id, "absorption opportunity expired");
        Ok(Some(opportunity))
    }

    async fn notify_expired(&self, opportunity: &AbsorptionOpportunity) {
        notify_best_effort(
            self.notifier.as_ref(),
            &opportunity.teacher,
            NotificationCategory::AbsorptionExpired,
            json!({
                "opportunity_id": opportunity.id.as_str(),
                "course_id": opportunity.course.0,
            }),
        )
        .await;
    }

    async fn lock_opportunity(
        &self,
        opportunity_id: &OpportunityId,
        teacher: &UserId,
    ) -> TeoResult<(AccountSession, AbsorptionOpportunity)> {
        let session = self.ledger.open(teacher).await?;
        let opportunity = session
            .store()
            .get_opportunity(opportunity_id)
            .await?
            .ok_or_else(|| TeoError::not_found("absorption", opportunity_id.as_str()))?;
        Ok((session, opportunity))
    }

    /// Time until an opportunity's window closes, zero if closed
    pub fn time_remaining(opportunity: &AbsorptionOpportunity, now: DateTime<Utc>) -> Duration {
        (opportunity.expires_at - now).max(Duration::zero())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::absorption::TierTable;
    use crate::error::ErrorKind;
    use crate::ports::RecordingNotifier;
    use crate::storage::MemoryStorage;
    use crate::types::{ManualClock, StakingTier};
    use chrono::TimeZone;

    struct Fixture {
        ledger: Arc<BalanceLedger>,
        engine: AbsorptionEngine,
        clock: Arc<ManualClock>,
        notifier: Arc<RecordingNotifier>,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 4, 1, 9, 0, 0).unwrap()));
        let ledger = Arc::new(BalanceLedger::new(
            Arc::new(MemoryStorage::new()),
            clock.clone(),
            TierTable::default(),
        ));
        let notifier = Arc::new(RecordingNotifier::new());
        let engine = AbsorptionEngine::new(ledger.clone(), notifier.clone(), &AbsorptionConfig::default());
        Fixture {
            ledger,
            engine,
            clock,
            notifier,
        }
    }

    fn request(teo_used: i64) -> OpportunityRequest {
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

    #[test]
    fn test_option_math_at_half_commission() {
        let (a, b) = compute_options(
            Decimal::new(100, 0),
            Decimal::new(10, 0),
            Decimal::new(10, 0),
            Decimal::new(50, 2),
            Decimal::new(25, 2),
        );
        assert_eq!(a.teacher_eur, Decimal::new(45, 0));
        assert_eq!(a.platform_eur, Decimal::new(45, 0));
        assert_eq!(a.teacher_teo, Decimal::ZERO);
        assert_eq!(b.teacher_eur, Decimal::ZERO);
        assert_eq!(b.platform_eur, Decimal::new(90, 0));
        assert_eq!(b.teacher_teo, Decimal::new(125, 1));
    }

    #[test]
    fn test_bonus_rounds_toward_zero() {
        let (_, b) = compute_options(
            Decimal::new(100, 0),
            Decimal::new(10, 0),
            Decimal::new(3, 8),
            Decimal::new(50, 2),
            Decimal::new(25, 2),
        );
        // 0.00000003 * 1.25 = 0.0000000375
        assert_eq!(b.teacher_teo, Decimal::new(3, 8));
    }

    #[tokio::test]
    async fn test_open_snapshots_tier_and_notifies_teacher() {
        let f = fixture();
        let teacher = UserId::new("teacher");
        f.ledger
            .credit(&teacher, Decimal::new(1_000, 0), TransactionKind::Earned, "teaching", None)
            .await
            .unwrap();
        f.ledger.stake(&teacher, Decimal::new(1_000, 0)).await.unwrap();

        let opp = f.engine.open_opportunity(request(10)).await.unwrap();
        assert_eq!(opp.teacher_tier, StakingTier::Diamond);
        assert_eq!(opp.commission_rate, Decimal::new(25, 2));
        assert_eq!(opp.option_a.teacher_eur, Decimal::new(675, 1));
        assert_eq!(opp.expires_at, opp.created_at + Duration::hours(24));

        // later unstaking does not change the snapshot
        f.ledger.unstake(&teacher, Decimal::new(1_000, 0)).await.unwrap();
        assert_eq!(f.engine.get(&opp.id).await.unwrap().commission_rate, Decimal::new(25, 2));

        let prompts = f.notifier.sent_with(NotificationCategory::AbsorptionOpportunity).await;
        assert_eq!(prompts.len(), 1);
        assert_eq!(prompts[0].user, teacher);
    }

    #[tokio::test]
    async fn test_absorb_credits_exactly_option_b() {
        let f = fixture();
        let teacher = UserId::new("teacher");
        let opp = f.engine.open_opportunity(request(10)).await.unwrap();

        let decided = f
            .engine
            .decide(&opp.id, &teacher, AbsorptionChoice::Absorb)
            .await
            .unwrap();
        assert_eq!(decided.status, AbsorptionStatus::Absorbed);
        assert_eq!(f.ledger.balance(&teacher).await.unwrap().available, Decimal::new(125, 1));

        let log = f.ledger.transactions(&teacher, 10).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].kind, TransactionKind::DiscountAbsorption);
        assert_eq!(log[0].reference.as_deref(), Some(opp.id.as_str()));

        let err = f
            .engine
            .decide(&opp.id, &teacher, AbsorptionChoice::Absorb)
            .await
            .unwrap_err();
        assert!(matches!(err, TeoError::Forbidden { .. }));
        assert_eq!(f.ledger.balance(&teacher).await.unwrap().available, Decimal::new(125, 1));
    }

    #[tokio::test]
    async fn test_refuse_has_no_ledger_effect() {
        let f = fixture();
        let teacher = UserId::new("teacher");
        let opp = f.engine.open_opportunity(request(10)).await.unwrap();

        f.engine
            .decide(&opp.id, &teacher, AbsorptionChoice::Refuse)
            .await
            .unwrap();
        assert!(f.ledger.transactions(&teacher, 10).await.unwrap().is_empty());
        assert_eq!(
            f.notifier.sent_with(NotificationCategory::AbsorptionRefused).await[0].user,
            UserId::new("student")
        );

        let err = f
            .engine
            .decide(&opp.id, &teacher, AbsorptionChoice::Absorb)
            .await
            .unwrap_err();
        assert!(matches!(err, TeoError::Forbidden { .. }));
        assert_eq!(err.kind(), ErrorKind::Forbidden);
        assert_eq!(f.engine.get(&opp.id).await.unwrap().status, AbsorptionStatus::Refused);
        assert_eq!(f.ledger.balance(&teacher).await.unwrap().total, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_decide_error_order() {
        let f = fixture();
        let teacher = UserId::new("teacher");
        let opp = f.engine.open_opportunity(request(10)).await.unwrap();

        let err = f
            .engine
            .decide(&OpportunityId::new("abs_missing"), &teacher, AbsorptionChoice::Absorb)
            .await
            .unwrap_err();
        assert!(matches!(err, TeoError::NotFound { .. }));

        let err = f
            .engine
            .decide(&opp.id, &UserId::new("intruder"), AbsorptionChoice::Absorb)
            .await
            .unwrap_err();
        assert!(matches!(err, TeoError::Forbidden { .. }));

        f.clock.advance(Duration::hours(24) + Duration::seconds(1));
        let err = f
            .engine
            .decide(&opp.id, &teacher, AbsorptionChoice::Absorb)
            .await
            .unwrap_err();
        assert!(matches!(err, TeoError::Expired { .. }));
        assert_eq!(f.engine.get(&opp.id).await.unwrap().status, AbsorptionStatus::Expired);

        let err = f
            .engine
            .decide(&opp.id, &teacher, AbsorptionChoice::Absorb)
            .await
            .unwrap_err();
        assert!(matches!(err, TeoError::Forbidden { .. }));
        assert_eq!(f.ledger.balance(&teacher).await.unwrap().total, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_decision_at_exact_deadline_is_accepted() {
        let f = fixture();
        let teacher = UserId::new("teacher");
        let opp = f.engine.open_opportunity(request(10)).await.unwrap();

        f.clock.set(opp.expires_at);
        let decided = f
            .engine
            .decide(&opp.id, &teacher, AbsorptionChoice::Refuse)
            .await
            .unwrap();
        assert_eq!(decided.status, AbsorptionStatus::Refused);
    }

    #[tokio::test]
    async fn test_sweep_after_window() {
        let f = fixture();
        let opp = f.engine.open_opportunity(request(10)).await.unwrap();

        assert_eq!(f.engine.sweep_expired().await.unwrap(), 0);
        f.clock.set(opp.expires_at + Duration::seconds(1));
        assert_eq!(f.engine.sweep_expired().await.unwrap(), 1);
        assert_eq!(f.engine.sweep_expired().await.unwrap(), 0);

        let stored = f.engine.get(&opp.id).await.unwrap();
        assert_eq!(stored.status, AbsorptionStatus::Expired);
        assert!(f
            .ledger
            .transactions(&UserId::new("teacher"), 10)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(f.notifier.sent_with(NotificationCategory::AbsorptionExpired).await.len(), 1);
    }

    #[tokio::test]
    async fn test_pending_for_teacher_expires_lazily() {
        let f = fixture();
        let teacher = UserId::new("teacher");
        let old = f.engine.open_opportunity(request(10)).await.unwrap();
        f.clock.advance(Duration::hours(20));
        let fresh = f.engine.open_opportunity(request(20)).await.unwrap();
        f.clock.advance(Duration::hours(5));

        let pending = f.engine.pending_for_teacher(&teacher).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, fresh.id);
        assert_eq!(f.engine.get(&old.id).await.unwrap().status, AbsorptionStatus::Expired);
    }

    #[tokio::test]
    async fn test_open_validation() {
        let f = fixture();
        let mut bad = request(10);
        bad.discount_percentage = 0;
        assert!(matches!(
            f.engine.open_opportunity(bad).await,
            Err(TeoError::InvalidAmount { .. })
        ));

        let mut bad = request(10);
        bad.discount_amount = Decimal::new(101, 0);
        assert!(f.engine.open_opportunity(bad).await.is_err());

        let mut bad = request(10);
        bad.teacher = bad.student.clone();
        assert!(matches!(
            f.engine.open_opportunity(bad).await,
            Err(TeoError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_time_remaining_clamps() {
        let now = Utc::now();
        let (option_a, option_b) = compute_options(
            Decimal::new(100, 0),
            Decimal::new(10, 0),
            Decimal::ONE,
            Decimal::new(50, 2),
            Decimal::new(25, 2),
        );
        let opp = AbsorptionOpportunity {
            id: OpportunityId::generate(),
            teacher: UserId::new("t"),
            student: UserId::new("s"),
            course: CourseId(1),
            course_price: Decimal::new(100, 0),
            discount_percentage: 10,
            teo_used_by_student: Decimal::ONE,
            discount_amount: Decimal::new(10, 0),
            teacher_tier: StakingTier::Bronze,
            commission_rate: Decimal::new(50, 2),
            option_a,
            option_b,
            status: AbsorptionStatus::Pending,
            created_at: now - Duration::hours(30),
            expires_at: now - Duration::hours(6),
            decided_at: None,
        };
        assert_eq!(AbsorptionEngine::time_remaining(&opp, now), Duration::zero());
    }
}
