//! Quote workflow state machine.
//!
//! `DRAFT -> {APPROVED | PENDING_APPROVAL} -> SENT -> {WON | LOST}`, with
//! EXPIRED reachable from any non-terminal state by an external scheduler.
//! Transitions check the actor gate first, then the current status; a
//! mismatch on either is reported without touching the quote. Timestamps
//! are injected by the caller so the engine stays deterministic.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::actor::Actor;
use crate::domain::quote::{Quote, QuoteStatus, WorkflowStamp};
use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowAction {
    CloseInternal,
    Approve,
    MarkSent,
    MarkWon,
    MarkLost,
    MarkExpired,
    EditLines,
}

impl WorkflowAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowAction::CloseInternal => "close_internal",
            WorkflowAction::Approve => "approve",
            WorkflowAction::MarkSent => "mark_sent",
            WorkflowAction::MarkWon => "mark_won",
            WorkflowAction::MarkLost => "mark_lost",
            WorkflowAction::MarkExpired => "mark_expired",
            WorkflowAction::EditLines => "edit_lines",
        }
    }
}

impl fmt::Display for WorkflowAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The content snapshot the approval policy judges a quote on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteReview {
    pub total: Decimal,
    pub max_discount_pct: u32,
}

/// Decides whether `close_internal` lands on APPROVED directly or routes
/// through PENDING_APPROVAL. The criteria are deployment policy, so the
/// engine only ever sees this interface.
pub trait ApprovalPolicy: Send + Sync {
    fn auto_approve(&self, review: &QuoteReview) -> bool;
}

/// Auto-approves while both the steepest line discount and the quote total
/// stay at or under the configured ceilings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThresholdApprovalPolicy {
    pub max_auto_discount_pct: u32,
    pub max_auto_total: Decimal,
}

impl ApprovalPolicy for ThresholdApprovalPolicy {
    fn auto_approve(&self, review: &QuoteReview) -> bool {
        review.max_discount_pct <= self.max_auto_discount_pct
            && review.total <= self.max_auto_total
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub action: WorkflowAction,
    pub from: QuoteStatus,
    pub to: QuoteStatus,
}

pub struct WorkflowEngine<P> {
    policy: P,
}

impl<P> WorkflowEngine<P>
where
    P: ApprovalPolicy,
{
    pub fn new(policy: P) -> Self {
        Self { policy }
    }

    /// DRAFT -> APPROVED or PENDING_APPROVAL, depending on the policy.
    pub fn close_internal(
        &self,
        quote: &mut Quote,
        actor: &Actor,
        review: &QuoteReview,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, DomainError> {
        ensure_manage(actor, quote, WorkflowAction::CloseInternal)?;
        ensure_status(quote, QuoteStatus::Draft, WorkflowAction::CloseInternal)?;

        let to = if self.policy.auto_approve(review) {
            quote.approved = Some(WorkflowStamp::new(actor.id, now));
            QuoteStatus::Approved
        } else {
            QuoteStatus::PendingApproval
        };
        Ok(apply(quote, actor, now, WorkflowAction::CloseInternal, to))
    }

    /// Manager sign-off for quotes the policy routed to review.
    pub fn approve(
        &self,
        quote: &mut Quote,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, DomainError> {
        if !actor.is_manager() {
            return Err(DomainError::Forbidden { action: WorkflowAction::Approve });
        }
        ensure_status(quote, QuoteStatus::PendingApproval, WorkflowAction::Approve)?;

        quote.approved = Some(WorkflowStamp::new(actor.id, now));
        Ok(apply(quote, actor, now, WorkflowAction::Approve, QuoteStatus::Approved))
    }

    pub fn mark_sent(
        &self,
        quote: &mut Quote,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, DomainError> {
        ensure_manage(actor, quote, WorkflowAction::MarkSent)?;
        ensure_status(quote, QuoteStatus::Approved, WorkflowAction::MarkSent)?;

        quote.sent = Some(WorkflowStamp::new(actor.id, now));
        Ok(apply(quote, actor, now, WorkflowAction::MarkSent, QuoteStatus::Sent))
    }

    pub fn mark_won(
        &self,
        quote: &mut Quote,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, DomainError> {
        ensure_manage(actor, quote, WorkflowAction::MarkWon)?;
        ensure_status(quote, QuoteStatus::Sent, WorkflowAction::MarkWon)?;

        quote.won = Some(WorkflowStamp::new(actor.id, now));
        Ok(apply(quote, actor, now, WorkflowAction::MarkWon, QuoteStatus::Won))
    }

    pub fn mark_lost(
        &self,
        quote: &mut Quote,
        actor: &Actor,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, DomainError> {
        ensure_manage(actor, quote, WorkflowAction::MarkLost)?;
        ensure_status(quote, QuoteStatus::Sent, WorkflowAction::MarkLost)?;

        let reason = reason.trim();
        if reason.is_empty() {
            return Err(DomainError::Validation {
                field: "reason",
                message: "a loss reason is required".to_owned(),
            });
        }

        quote.lost = Some(WorkflowStamp::new(actor.id, now));
        quote.lost_reason = Some(reason.to_owned());
        Ok(apply(quote, actor, now, WorkflowAction::MarkLost, QuoteStatus::Lost))
    }

    /// Time-based expiry, driven by an external scheduler; there is no
    /// actor gate and no attribution stamp.
    pub fn mark_expired(
        &self,
        quote: &mut Quote,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, DomainError> {
        if quote.status.is_terminal() {
            return Err(DomainError::TransitionRejected {
                action: WorkflowAction::MarkExpired,
                status: quote.status,
            });
        }

        let from = quote.status;
        quote.status = QuoteStatus::Expired;
        quote.updated_at = now;
        Ok(TransitionOutcome { action: WorkflowAction::MarkExpired, from, to: QuoteStatus::Expired })
    }

    /// Gate for line rebuilds: owner/CSR/manager, and only while the quote
    /// has not been sent.
    pub fn ensure_can_edit(&self, quote: &Quote, actor: &Actor) -> Result<(), DomainError> {
        ensure_manage(actor, quote, WorkflowAction::EditLines)?;
        if !quote.status.is_editable() {
            return Err(DomainError::TransitionRejected {
                action: WorkflowAction::EditLines,
                status: quote.status,
            });
        }
        Ok(())
    }

    /// Line changes invalidate a prior approval: a quote that was APPROVED
    /// or PENDING_APPROVAL goes back through the same auto-approval
    /// decision as `close_internal`. A DRAFT quote stays DRAFT.
    pub fn reevaluate_after_edit(
        &self,
        quote: &mut Quote,
        actor: &Actor,
        review: &QuoteReview,
        now: DateTime<Utc>,
    ) -> Option<TransitionOutcome> {
        if !matches!(quote.status, QuoteStatus::Approved | QuoteStatus::PendingApproval) {
            return None;
        }

        quote.approved = None;
        let to = if self.policy.auto_approve(review) {
            quote.approved = Some(WorkflowStamp::new(actor.id, now));
            QuoteStatus::Approved
        } else {
            QuoteStatus::PendingApproval
        };
        Some(apply(quote, actor, now, WorkflowAction::EditLines, to))
    }
}

fn ensure_manage(actor: &Actor, quote: &Quote, action: WorkflowAction) -> Result<(), DomainError> {
    if actor.oversees_all_quotes() || quote.owner_id == actor.id {
        Ok(())
    } else {
        Err(DomainError::Forbidden { action })
    }
}

fn ensure_status(
    quote: &Quote,
    expected: QuoteStatus,
    action: WorkflowAction,
) -> Result<(), DomainError> {
    if quote.status == expected {
        Ok(())
    } else {
        Err(DomainError::TransitionRejected { action, status: quote.status })
    }
}

fn apply(
    quote: &mut Quote,
    actor: &Actor,
    now: DateTime<Utc>,
    action: WorkflowAction,
    to: QuoteStatus,
) -> TransitionOutcome {
    let from = quote.status;
    quote.status = to;
    quote.updated_at = now;
    quote.updated_by = actor.id;
    TransitionOutcome { action, from, to }
}
