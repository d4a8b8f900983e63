//! Authorized operation executor
//!
//! Order of work for every call:
//! 1. validate and consume the signature
//! 2. bind the signing wallet to the calling user
//! 3. perform the side effect
//!
//! A signature consumed in step 1 stays consumed even if a later step fails.

use rust_decimal::Decimal;
use std::sync::Arc;
use teo_signer::{AuthorizationReceipt, AuthorizationRequest, AuthorizedOperation, SignatureAuthorizer};
use tracing::{error, info, warn};

use crate::absorption::{AbsorptionEngine, OpportunityRequest};
use crate::error::{TeoError, TeoResult};
use crate::ledger::BalanceLedger;
use crate::ports::{AccountDirectory, EnrollmentCollaborator};
use crate::types::{round_amount, AbsorptionOpportunity, CourseId, TransactionKind, UserId};

/// A signed request together with who presented it
#[derive(Debug, Clone)]
pub struct AuthorizedCall {
    /// Platform user presenting the authorization
    pub user: UserId,
    /// Signed authorization
    pub request: AuthorizationRequest,
    /// Course teacher, required for discount redemptions
    pub teacher: Option<UserId>,
}

impl AuthorizedCall {
    pub fn new(user: UserId, request: AuthorizationRequest) -> Self {
        Self {
            user,
            request,
            teacher: None,
        }
    }

    pub fn with_teacher(mut self, teacher: UserId) -> Self {
        self.teacher = Some(teacher);
        self
    }
}

/// Side effect performed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Staked {
        staked: Decimal,
    },
    Unstaked {
        staked: Decimal,
    },
    DiscountRedeemed {
        student_available: Decimal,
        opportunity: AbsorptionOpportunity,
    },
}

/// Receipt plus outcome
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub receipt: AuthorizationReceipt,
    pub outcome: ExecutionOutcome,
}

/// Authorized operation executor
pub struct AuthorizedExecutor {
    authorizer: Arc<SignatureAuthorizer>,
    ledger: Arc<BalanceLedger>,
    absorption: Arc<AbsorptionEngine>,
    directory: Arc<dyn AccountDirectory>,
    enrollment: Arc<dyn EnrollmentCollaborator>,
}

impl AuthorizedExecutor {
    pub fn new(
        authorizer: Arc<SignatureAuthorizer>,
        ledger: Arc<BalanceLedger>,
        absorption: Arc<AbsorptionEngine>,
        directory: Arc<dyn AccountDirectory>,
        enrollment: Arc<dyn EnrollmentCollaborator>,
    ) -> Self {
        Self {
            authorizer,
            ledger,
            absorption,
            directory,
            enrollment,
        }
    }

    pub fn authorizer(&self) -> &Arc<SignatureAuthorizer> {
        &self.authorizer
    }

    /// Validate, bind and execute a signed operation
    pub async fn execute_authorized_operation(&self, call: &AuthorizedCall) -> TeoResult<ExecutionResult> {
        let now = self.ledger.clock().now();
        let receipt = self.authorizer.validate_at(&call.request, now).await?;

        let wallet = self.directory.resolve_wallet(&call.user).await?;
        if wallet != call.request.actor {
            warn!(
                target: "security",
                user = %call.user,
                wallet = %wallet,
                actor = %call.request.actor,
                "authorization signed by a wallet not linked to the caller"
            );
            return Err(TeoError::forbidden("wallet", call.request.actor.to_string(), call.user.as_str()));
        }

        let outcome = match &call.request.operation {
            AuthorizedOperation::Stake { amount } => ExecutionOutcome::Staked {
                staked: self.ledger.stake(&call.user, *amount).await?,
            },
            AuthorizedOperation::Unstake { amount } => ExecutionOutcome::Unstaked {
                staked: self.ledger.unstake(&call.user, *amount).await?,
            },
            AuthorizedOperation::DiscountRedemption {
                teacher,
                course_id,
                course_price,
                discount_percentage,
                teo_cost,
            } => {
                let teacher_user = call.teacher.clone().ok_or_else(|| TeoError::InvalidState {
                    reason: "discount redemption requires the course teacher".to_string(),
                })?;
                let teacher_wallet = self.directory.resolve_wallet(&teacher_user).await?;
                if teacher_wallet != *teacher {
                    return Err(TeoError::forbidden(
                        "teacher wallet",
                        teacher.to_string(),
                        teacher_user.as_str(),
                    ));
                }
                let opportunity = OpportunityRequest {
                    student: call.user.clone(),
                    teacher: teacher_user,
                    course: CourseId(*course_id),
                    course_price: *course_price,
                    discount_percentage: *discount_percentage,
                    teo_used: *teo_cost,
                    discount_amount: round_amount(
                        *course_price * Decimal::from(*discount_percentage) / Decimal::ONE_HUNDRED,
                    ),
                };
                self.redeem_discount(opportunity).await?
            }
        };

        info!(
            user = %call.user,
            actor = %call.request.actor,
            nonce = call.request.nonce,
            operation = call.request.operation.name(),
            "authorized operation executed"
        );
        Ok(ExecutionResult { receipt, outcome })
    }

    /// Debit the student, grant access, open the teacher's negotiation
    async fn redeem_discount(&self, request: OpportunityRequest) -> TeoResult<ExecutionOutcome> {
        request.validate()?;

        let student_available = self
            .ledger
            .debit(
                &request.student,
                request.teo_used,
                TransactionKind::SpentDiscount,
                &format!("{}% discount on {}", request.discount_percentage, request.course),
                Some(request.course),
            )
            .await?;

        if let Err(e) = self
            .enrollment
            .discount_redeemed(&request.student, request.course, request.teo_used)
            .await
        {
            warn!(student = %request.student, course = %request.course, error = %e, "enrollment update failed");
        }

        let student = request.student.clone();
        let course = request.course;
        let opportunity = match self.absorption.open_opportunity(request).await {
            Ok(opportunity) => opportunity,
            Err(e) => {
                error!(
                    student = %student,
                    course = %course,
                    error = %e,
                    "discount debited but absorption opportunity not opened"
                );
                return Err(e);
            }
        };

        Ok(ExecutionOutcome::DiscountRedeemed {
            student_available,
            opportunity,
        })
    }
}
