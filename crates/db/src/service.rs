//! Quote operations exposed to the presentation layer.
//!
//! Each method is one request-sized unit of work: resolve lookups, run the
//! pure engines from the core crate, persist through the repositories.
//! Multi-row writes (the line rebuild) run inside a single transaction
//! owned by the repository, and workflow writes are conditional on the
//! status the transition was computed from.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use bitquote_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use bitquote_core::config::{ApprovalConfig, PricingConfig};
use bitquote_core::domain::actor::{Actor, ActorId};
use bitquote_core::domain::party::{ContactId, CustomerId};
use bitquote_core::domain::quote::{
    PaymentTerms, Quote, QuoteComment, QuoteId, QuoteStatus,
};
use bitquote_core::errors::{ApplicationError, DomainError};
use bitquote_core::pricing::{plan_rebuild, LineInput};
use rust_decimal::Decimal;
use bitquote_core::workflow::{
    QuoteReview, ThresholdApprovalPolicy, TransitionOutcome, WorkflowEngine,
};
use bitquote_core::{identity, WorkflowAction};

use crate::repositories::{
    DashboardSnapshot, NewQuoteRow, QuoteDetail, QuoteListFilter, RepositoryError,
    SqlDirectoryRepository, SqlProductRepository, SqlQuoteRepository,
};
use crate::DbPool;

pub struct QuoteService {
    quotes: SqlQuoteRepository,
    products: SqlProductRepository,
    directory: SqlDirectoryRepository,
    engine: WorkflowEngine<ThresholdApprovalPolicy>,
    tax_rate: Decimal,
    audit: Option<Arc<dyn AuditSink>>,
}

#[derive(Clone, Debug)]
pub struct CreateQuoteInput {
    pub customer_id: CustomerId,
    pub contact_id: ContactId,
    /// Honored for CSR/manager actors; everyone else owns their own quotes.
    pub owner_id: Option<ActorId>,
    pub payment_terms: PaymentTerms,
}

#[derive(Clone, Debug, Default)]
pub struct QuoteListQuery {
    pub customer_id: Option<CustomerId>,
    pub owner_id: Option<ActorId>,
}

impl QuoteService {
    pub fn new(pool: DbPool, pricing: &PricingConfig, approval: &ApprovalConfig) -> Self {
        Self {
            quotes: SqlQuoteRepository::new(pool.clone()),
            products: SqlProductRepository::new(pool.clone()),
            directory: SqlDirectoryRepository::new(pool),
            engine: WorkflowEngine::new(ThresholdApprovalPolicy {
                max_auto_discount_pct: approval.max_auto_discount_pct,
                max_auto_total: approval.max_auto_total,
            }),
            tax_rate: pricing.tax_rate,
            audit: None,
        }
    }

    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    /// Resolves the request actor from the user directory.
    pub async fn resolve_actor(&self, id: ActorId) -> Result<Actor, ApplicationError> {
        self.directory
            .find_actor(id)
            .await?
            .ok_or_else(|| ApplicationError::NotFound(format!("actor {}", id.0)))
    }

    /// Creates a DRAFT quote and assigns its identity. The owner's name is
    /// checked before anything is written, so a quote can never outlive
    /// its first save with a null reference.
    pub async fn create_quote(
        &self,
        input: CreateQuoteInput,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<Quote, ApplicationError> {
        self.directory.find_customer(input.customer_id).await?.ok_or_else(|| {
            DomainError::Validation {
                field: "customer",
                message: format!("unknown customer {}", input.customer_id.0),
            }
        })?;

        let contact =
            self.directory.find_contact(input.contact_id).await?.ok_or_else(|| {
                DomainError::Validation {
                    field: "contact",
                    message: format!("unknown contact {}", input.contact_id.0),
                }
            })?;
        if !contact.belongs_to(input.customer_id) {
            return Err(DomainError::Validation {
                field: "contact",
                message: "contact does not belong to the selected customer".to_owned(),
            }
            .into());
        }
        if !contact.is_active {
            return Err(DomainError::Validation {
                field: "contact",
                message: "contact is no longer active".to_owned(),
            }
            .into());
        }

        let owner = match input.owner_id {
            Some(owner_id) if actor.oversees_all_quotes() && owner_id != actor.id => self
                .directory
                .find_actor(owner_id)
                .await?
                .ok_or_else(|| DomainError::Validation {
                    field: "owner",
                    message: format!("unknown user {}", owner_id.0),
                })?,
            _ => actor.clone(),
        };

        let initials = identity::owner_initials(&owner.first_name, &owner.last_name)?;

        let id = self
            .quotes
            .insert_draft(&NewQuoteRow {
                customer_id: input.customer_id,
                contact_id: input.contact_id,
                owner_id: owner.id,
                payment_terms: input.payment_terms,
                created_by: actor.id,
                created_at: now,
            })
            .await?;

        let reference = identity::reference_from_initials(&initials, now.date_naive(), id.0);
        let valid_until = identity::valid_until(now.date_naive());
        self.quotes.set_identity(id, &reference, valid_until).await?;

        let quote = self.load_quote(id).await?;
        self.emit(
            AuditEvent::new(
                Some(id),
                correlation(id),
                "quote.created",
                AuditCategory::Persistence,
                actor_label(actor),
                AuditOutcome::Success,
            )
            .with_metadata("reference", reference.0.clone()),
        );
        Ok(quote)
    }

    /// Re-runs the identity assigner. A no-op once the reference and
    /// validity date are set.
    pub async fn assign_identity(&self, id: QuoteId) -> Result<Quote, ApplicationError> {
        let quote = self.load_quote(id).await?;
        if quote.has_identity() {
            return Ok(quote);
        }

        let owner = self.resolve_actor(quote.owner_id).await?;
        let initials = identity::owner_initials(&owner.first_name, &owner.last_name)?;
        let created_on = quote.created_at.date_naive();
        let reference = identity::reference_from_initials(&initials, created_on, id.0);
        self.quotes.set_identity(id, &reference, identity::valid_until(created_on)).await?;
        self.load_quote(id).await
    }

    pub async fn get_quote(&self, id: QuoteId) -> Result<QuoteDetail, ApplicationError> {
        self.quotes
            .find_detail(id)
            .await?
            .ok_or_else(|| ApplicationError::NotFound(format!("quote {}", id.0)))
    }

    /// Sales reps see their own pipeline; CSR and manager may browse all
    /// quotes and filter by owner.
    pub async fn list_quotes(
        &self,
        query: &QuoteListQuery,
        actor: &Actor,
    ) -> Result<Vec<Quote>, ApplicationError> {
        let owner_id = if actor.oversees_all_quotes() {
            query.owner_id
        } else {
            Some(actor.id)
        };
        let filter = QuoteListFilter { customer_id: query.customer_id, owner_id };
        Ok(self.quotes.list(&filter).await?)
    }

    /// Full line replacement: existing lines and sections are dropped and
    /// rebuilt from the submitted set. Also accepts new
    /// payment terms, which travel with the same form post. A quote that
    /// was APPROVED or PENDING_APPROVAL is re-judged by the approval
    /// policy, since its content just changed.
    pub async fn rebuild_lines(
        &self,
        id: QuoteId,
        inputs: &[LineInput],
        payment_terms: Option<PaymentTerms>,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<QuoteDetail, ApplicationError> {
        let mut quote = self.load_quote(id).await?;
        self.engine.ensure_can_edit(&quote, actor)?;

        let mut product_ids: Vec<_> = inputs.iter().map(|input| input.product_id).collect();
        product_ids.sort_unstable_by_key(|product_id| product_id.0);
        product_ids.dedup();
        let catalog = self.products.find_by_ids(&product_ids).await?;

        let plan = plan_rebuild(inputs, &catalog, self.tax_rate)?;

        quote.totals = plan.totals.clone();
        if let Some(terms) = payment_terms {
            quote.payment_terms = terms;
        }
        quote.updated_at = now;
        quote.updated_by = actor.id;

        let review = QuoteReview {
            total: plan.totals.total,
            max_discount_pct: plan.max_discount().percent(),
        };
        let reevaluation = self.engine.reevaluate_after_edit(&mut quote, actor, &review, now);

        self.quotes.replace_lines(&quote, &plan).await?;

        let mut event = AuditEvent::new(
            Some(id),
            correlation(id),
            "quote.lines_rebuilt",
            AuditCategory::Pricing,
            actor_label(actor),
            AuditOutcome::Success,
        )
        .with_metadata("line_count", plan.line_count().to_string())
        .with_metadata("total", plan.totals.total.to_string());
        if let Some(outcome) = &reevaluation {
            event = event
                .with_metadata("from", outcome.from.as_str())
                .with_metadata("to", outcome.to.as_str());
        }
        self.emit(event);

        self.get_quote(id).await
    }

    /// DRAFT -> APPROVED or PENDING_APPROVAL per the approval policy.
    pub async fn close_internal(
        &self,
        id: QuoteId,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, ApplicationError> {
        let detail = self.get_quote(id).await?;
        let review = QuoteReview {
            total: detail.quote.totals.total,
            max_discount_pct: detail.max_discount_pct(),
        };
        let mut quote = detail.quote;
        self.transition(&mut quote, actor, |engine, quote| {
            engine.close_internal(quote, actor, &review, now)
        })
        .await
    }

    /// Manager sign-off: PENDING_APPROVAL -> APPROVED.
    pub async fn approve(
        &self,
        id: QuoteId,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, ApplicationError> {
        let mut quote = self.load_quote(id).await?;
        self.transition(&mut quote, actor, |engine, quote| engine.approve(quote, actor, now))
            .await
    }

    pub async fn mark_sent(
        &self,
        id: QuoteId,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, ApplicationError> {
        let mut quote = self.load_quote(id).await?;
        self.transition(&mut quote, actor, |engine, quote| engine.mark_sent(quote, actor, now))
            .await
    }

    pub async fn mark_won(
        &self,
        id: QuoteId,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, ApplicationError> {
        let mut quote = self.load_quote(id).await?;
        self.transition(&mut quote, actor, |engine, quote| engine.mark_won(quote, actor, now))
            .await
    }

    pub async fn mark_lost(
        &self,
        id: QuoteId,
        actor: &Actor,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, ApplicationError> {
        let mut quote = self.load_quote(id).await?;
        self.transition(&mut quote, actor, |engine, quote| {
            engine.mark_lost(quote, actor, reason, now)
        })
        .await
    }

    /// Invoked by the external expiry scheduler; no actor gate.
    pub async fn mark_expired(
        &self,
        id: QuoteId,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, ApplicationError> {
        let mut quote = self.load_quote(id).await?;
        let prior = quote.status;
        let outcome = match self.engine.mark_expired(&mut quote, now) {
            Ok(outcome) => outcome,
            Err(error) => {
                self.emit_rejection(id, WorkflowAction::MarkExpired, "scheduler", &error);
                return Err(error.into());
            }
        };
        self.persist_transition(&quote, prior, outcome, "scheduler").await
    }

    pub async fn add_comment(
        &self,
        id: QuoteId,
        actor: &Actor,
        body: &str,
        now: DateTime<Utc>,
    ) -> Result<QuoteComment, ApplicationError> {
        let body = body.trim();
        if body.is_empty() {
            return Err(DomainError::Validation {
                field: "body",
                message: "a comment body is required".to_owned(),
            }
            .into());
        }

        // Ensure the quote exists before appending.
        self.load_quote(id).await?;
        let comment = self.quotes.add_comment(id, actor.id, body, now).await?;
        self.emit(AuditEvent::new(
            Some(id),
            correlation(id),
            "quote.comment_added",
            AuditCategory::Persistence,
            actor_label(actor),
            AuditOutcome::Success,
        ));
        Ok(comment)
    }

    pub async fn comments(&self, id: QuoteId) -> Result<Vec<QuoteComment>, ApplicationError> {
        self.load_quote(id).await?;
        Ok(self.quotes.comments_for(id).await?)
    }

    /// Open-pipeline and current-month won figures. Managers see the whole
    /// organization; everyone else their own quotes.
    pub async fn dashboard(
        &self,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<DashboardSnapshot, ApplicationError> {
        let owner_id = if actor.is_manager() { None } else { Some(actor.id) };
        Ok(self.quotes.dashboard(owner_id, now).await?)
    }

    async fn load_quote(&self, id: QuoteId) -> Result<Quote, ApplicationError> {
        self.quotes
            .find_by_id(id)
            .await?
            .ok_or_else(|| ApplicationError::NotFound(format!("quote {}", id.0)))
    }

    async fn transition<F>(
        &self,
        quote: &mut Quote,
        actor: &Actor,
        apply: F,
    ) -> Result<TransitionOutcome, ApplicationError>
    where
        F: FnOnce(
            &WorkflowEngine<ThresholdApprovalPolicy>,
            &mut Quote,
        ) -> Result<TransitionOutcome, DomainError>,
    {
        let prior = quote.status;
        let id = quote.id;
        match apply(&self.engine, quote) {
            Ok(outcome) => {
                self.persist_transition(quote, prior, outcome, &actor_label(actor)).await
            }
            Err(error) => {
                if let DomainError::TransitionRejected { action, .. }
                | DomainError::Forbidden { action } = &error
                {
                    self.emit_rejection(id, *action, &actor_label(actor), &error);
                }
                Err(error.into())
            }
        }
    }

    async fn persist_transition(
        &self,
        quote: &Quote,
        expected: QuoteStatus,
        outcome: TransitionOutcome,
        actor_label: &str,
    ) -> Result<TransitionOutcome, ApplicationError> {
        let applied = self.quotes.update_workflow(quote, expected).await?;
        if !applied {
            // Another writer changed the status since we loaded the row.
            let current = self.load_quote(quote.id).await?;
            let error = DomainError::TransitionRejected {
                action: outcome.action,
                status: current.status,
            };
            self.emit_rejection(quote.id, outcome.action, actor_label, &error);
            return Err(error.into());
        }

        self.emit(
            AuditEvent::new(
                Some(quote.id),
                correlation(quote.id),
                "workflow.transition_applied",
                AuditCategory::Workflow,
                actor_label,
                AuditOutcome::Success,
            )
            .with_metadata("action", outcome.action.as_str())
            .with_metadata("from", outcome.from.as_str())
            .with_metadata("to", outcome.to.as_str()),
        );
        Ok(outcome)
    }

    fn emit_rejection(
        &self,
        id: QuoteId,
        action: WorkflowAction,
        actor_label: &str,
        error: &DomainError,
    ) {
        self.emit(
            AuditEvent::new(
                Some(id),
                correlation(id),
                "workflow.transition_rejected",
                AuditCategory::Workflow,
                actor_label,
                AuditOutcome::Rejected,
            )
            .with_metadata("action", action.as_str())
            .with_metadata("error", error.to_string()),
        );
    }

    fn emit(&self, event: AuditEvent) {
        if let Some(sink) = &self.audit {
            sink.emit(event);
        }
    }
}

impl From<RepositoryError> for ApplicationError {
    fn from(error: RepositoryError) -> Self {
        ApplicationError::Persistence(error.to_string())
    }
}

fn correlation(id: QuoteId) -> String {
    format!("quote-{}", id.0)
}

fn actor_label(actor: &Actor) -> String {
    format!("user-{}", actor.id.0)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{DateTime, Duration, NaiveDate, Utc};

    use bitquote_core::audit::InMemoryAuditSink;
    use bitquote_core::config::{ApprovalConfig, PricingConfig};
    use bitquote_core::domain::actor::{Actor, ActorId};
    use bitquote_core::domain::party::{ContactId, CustomerId};
    use bitquote_core::domain::product::ProductId;
    use bitquote_core::domain::quote::{DiscountRate, PaymentTerms, QuoteId, QuoteStatus};
    use bitquote_core::errors::{ApplicationError, DomainError};
    use bitquote_core::pricing::LineInput;
    use rust_decimal::Decimal;

    use super::{CreateQuoteInput, QuoteListQuery, QuoteService};
    use crate::fixtures::SeedDataset;
    use crate::{connect_with_settings, migrations};

    async fn setup_service() -> (QuoteService, Arc<InMemoryAuditSink>) {
        let pool = connect_with_settings("sqlite::memory:", 1, 30)
            .await
            .expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        SeedDataset::load(&pool).await.expect("load seed fixtures");

        let sink = Arc::new(InMemoryAuditSink::default());
        let service = QuoteService::new(
            pool,
            &PricingConfig { tax_rate: Decimal::new(16, 2) },
            &ApprovalConfig {
                max_auto_discount_pct: 10,
                max_auto_total: Decimal::new(250_000_00, 2),
            },
        )
        .with_audit_sink(sink.clone());
        (service, sink)
    }

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-10-28T15:00:00Z")
            .expect("valid rfc3339")
            .with_timezone(&Utc)
    }

    async fn actor(service: &QuoteService, id: i64) -> Actor {
        service.resolve_actor(ActorId(id)).await.expect("seeded actor")
    }

    fn create_input() -> CreateQuoteInput {
        CreateQuoteInput {
            customer_id: CustomerId(1),
            contact_id: ContactId(1),
            owner_id: None,
            payment_terms: PaymentTerms::Net30,
        }
    }

    fn line(product_id: i64, quantity: u32, discount: DiscountRate) -> LineInput {
        LineInput {
            product_id: ProductId(product_id),
            quantity,
            discount,
            delivery_days: 15,
            unit_price: None,
            description: None,
        }
    }

    #[tokio::test]
    async fn create_quote_assigns_reference_and_validity() {
        let (service, _) = setup_service().await;
        let sales = actor(&service, 1).await;

        let quote = service.create_quote(create_input(), &sales, now()).await.expect("create");

        let reference = quote.reference.as_ref().expect("reference assigned");
        assert_eq!(reference.0, format!("BIT-MG-251028-{:05}", quote.id.0));
        assert_eq!(
            quote.valid_until,
            Some(NaiveDate::from_ymd_opt(2025, 10, 31).expect("valid date")),
        );
        assert_eq!(quote.status, QuoteStatus::Draft);
        assert_eq!(quote.owner_id, sales.id);
    }

    #[tokio::test]
    async fn create_quote_rejects_foreign_or_inactive_contacts() {
        let (service, _) = setup_service().await;
        let sales = actor(&service, 1).await;

        // Contact 3 belongs to customer 2, not customer 1.
        let mismatched = CreateQuoteInput { contact_id: ContactId(3), ..create_input() };
        let error = service
            .create_quote(mismatched, &sales, now())
            .await
            .expect_err("contact of another customer");
        assert!(matches!(
            error,
            ApplicationError::Domain(DomainError::Validation { field: "contact", .. })
        ));

        let inactive = CreateQuoteInput { contact_id: ContactId(2), ..create_input() };
        let error = service
            .create_quote(inactive, &sales, now())
            .await
            .expect_err("inactive contact");
        assert!(matches!(
            error,
            ApplicationError::Domain(DomainError::Validation { field: "contact", .. })
        ));
    }

    #[tokio::test]
    async fn sales_reps_always_own_their_quotes_while_csr_may_assign() {
        let (service, _) = setup_service().await;
        let sales = actor(&service, 1).await;
        let csr = actor(&service, 2).await;

        let grabbed = CreateQuoteInput { owner_id: Some(ActorId(3)), ..create_input() };
        let quote = service.create_quote(grabbed, &sales, now()).await.expect("create");
        assert_eq!(quote.owner_id, sales.id, "sales cannot assign someone else");

        let assigned = CreateQuoteInput { owner_id: Some(ActorId(1)), ..create_input() };
        let quote = service.create_quote(assigned, &csr, now()).await.expect("create");
        assert_eq!(quote.owner_id, ActorId(1));
        // Initials come from the assigned owner, not the acting CSR.
        assert!(quote.reference.expect("reference").0.starts_with("BIT-MG-"));
    }

    #[tokio::test]
    async fn identity_assignment_is_idempotent() {
        let (service, _) = setup_service().await;
        let sales = actor(&service, 1).await;

        let quote = service.create_quote(create_input(), &sales, now()).await.expect("create");
        let again = service.assign_identity(quote.id).await.expect("re-run assigner");

        assert_eq!(again.reference, quote.reference);
        assert_eq!(again.valid_until, quote.valid_until);
    }

    #[tokio::test]
    async fn rebuild_persists_sections_lines_and_totals() {
        let (service, _) = setup_service().await;
        let sales = actor(&service, 1).await;
        let quote = service.create_quote(create_input(), &sales, now()).await.expect("create");

        let inputs = [
            line(3, 4, DiscountRate::Ten),
            line(1, 1, DiscountRate::None),
            line(4, 1, DiscountRate::None),
        ];
        let detail = service
            .rebuild_lines(quote.id, &inputs, Some(PaymentTerms::Net60), &sales, now())
            .await
            .expect("rebuild");

        assert_eq!(detail.sections.len(), 3);
        assert_eq!(detail.sections[0].section.name, "Consumable");
        assert_eq!(detail.sections[1].section.name, "Equipment");
        assert_eq!(detail.sections[2].section.name, "Service");
        assert_eq!(detail.lines().count(), 3);
        assert_eq!(detail.quote.payment_terms, PaymentTerms::Net60);

        // 4 x 199.99 = 799.96 gross, 80.00 discount; 125000 + 15000 gross.
        assert_eq!(detail.quote.totals.sub_total, Decimal::new(140_799_96, 2));
        assert_eq!(detail.quote.totals.discount_total, Decimal::new(80_00, 2));
        let taxable = Decimal::new(140_719_96, 2);
        assert_eq!(detail.quote.totals.tax, Decimal::new(22_515_19, 2));
        assert_eq!(detail.quote.totals.total, taxable + detail.quote.totals.tax);
    }

    #[tokio::test]
    async fn rebuild_with_unknown_product_rolls_back_entirely() {
        let (service, _) = setup_service().await;
        let sales = actor(&service, 1).await;
        let quote = service.create_quote(create_input(), &sales, now()).await.expect("create");

        service
            .rebuild_lines(quote.id, &[line(1, 1, DiscountRate::None)], None, &sales, now())
            .await
            .expect("initial rebuild");

        let error = service
            .rebuild_lines(
                quote.id,
                &[line(1, 2, DiscountRate::None), line(999, 1, DiscountRate::None)],
                None,
                &sales,
                now(),
            )
            .await
            .expect_err("unknown product must abort");
        assert!(matches!(
            error,
            ApplicationError::Domain(DomainError::UnknownProduct { index: 1, product_id: 999 })
        ));

        let detail = service.get_quote(quote.id).await.expect("detail");
        assert_eq!(detail.lines().count(), 1, "previous line set must survive");
        assert_eq!(detail.lines().next().expect("line").quantity, 1);
    }

    #[tokio::test]
    async fn close_internal_follows_the_approval_policy() {
        let (service, _) = setup_service().await;
        let sales = actor(&service, 1).await;

        // Small quote, modest discount: auto-approved.
        let quote = service.create_quote(create_input(), &sales, now()).await.expect("create");
        service
            .rebuild_lines(quote.id, &[line(3, 2, DiscountRate::Five)], None, &sales, now())
            .await
            .expect("rebuild");
        let outcome = service.close_internal(quote.id, &sales, now()).await.expect("close");
        assert_eq!(outcome.to, QuoteStatus::Approved);

        // 50% discount: routed to review.
        let quote = service.create_quote(create_input(), &sales, now()).await.expect("create");
        service
            .rebuild_lines(quote.id, &[line(3, 2, DiscountRate::Fifty)], None, &sales, now())
            .await
            .expect("rebuild");
        let outcome = service.close_internal(quote.id, &sales, now()).await.expect("close");
        assert_eq!(outcome.to, QuoteStatus::PendingApproval);

        // Over the total ceiling even without discounts.
        let quote = service.create_quote(create_input(), &sales, now()).await.expect("create");
        service
            .rebuild_lines(quote.id, &[line(1, 3, DiscountRate::None)], None, &sales, now())
            .await
            .expect("rebuild");
        let outcome = service.close_internal(quote.id, &sales, now()).await.expect("close");
        assert_eq!(outcome.to, QuoteStatus::PendingApproval);
    }

    #[tokio::test]
    async fn full_lifecycle_draft_to_won() {
        let (service, sink) = setup_service().await;
        let sales = actor(&service, 1).await;
        let manager = actor(&service, 3).await;

        let quote = service.create_quote(create_input(), &sales, now()).await.expect("create");
        service
            .rebuild_lines(quote.id, &[line(3, 2, DiscountRate::Fifty)], None, &sales, now())
            .await
            .expect("rebuild");

        service.close_internal(quote.id, &sales, now()).await.expect("close");
        service.approve(quote.id, &manager, now() + Duration::hours(1)).await.expect("approve");
        service.mark_sent(quote.id, &sales, now() + Duration::hours(2)).await.expect("send");
        service.mark_won(quote.id, &sales, now() + Duration::hours(3)).await.expect("win");

        let stored = service.get_quote(quote.id).await.expect("detail").quote;
        assert_eq!(stored.status, QuoteStatus::Won);
        assert_eq!(stored.approved.as_ref().map(|stamp| stamp.by), Some(manager.id));
        assert_eq!(stored.sent.as_ref().map(|stamp| stamp.by), Some(sales.id));
        assert_eq!(stored.won.as_ref().map(|stamp| stamp.by), Some(sales.id));

        let applied = sink
            .events()
            .iter()
            .filter(|event| event.event_type == "workflow.transition_applied")
            .count();
        assert_eq!(applied, 4);
    }

    #[tokio::test]
    async fn draft_cannot_be_sent_and_stays_untouched() {
        let (service, sink) = setup_service().await;
        let sales = actor(&service, 1).await;
        let quote = service.create_quote(create_input(), &sales, now()).await.expect("create");

        let error = service
            .mark_sent(quote.id, &sales, now())
            .await
            .expect_err("draft must pass approval first");
        assert!(matches!(
            error,
            ApplicationError::Domain(DomainError::TransitionRejected { .. })
        ));

        let stored = service.get_quote(quote.id).await.expect("detail").quote;
        assert_eq!(stored.status, QuoteStatus::Draft);
        assert!(stored.sent.is_none());
        assert!(sink
            .events()
            .iter()
            .any(|event| event.event_type == "workflow.transition_rejected"));
    }

    #[tokio::test]
    async fn editing_an_approved_quote_reopens_review() {
        let (service, _) = setup_service().await;
        let sales = actor(&service, 1).await;

        let quote = service.create_quote(create_input(), &sales, now()).await.expect("create");
        service
            .rebuild_lines(quote.id, &[line(3, 2, DiscountRate::Five)], None, &sales, now())
            .await
            .expect("rebuild");
        service.close_internal(quote.id, &sales, now()).await.expect("close");
        assert_eq!(
            service.get_quote(quote.id).await.expect("detail").quote.status,
            QuoteStatus::Approved,
        );

        // Push the discount past the auto-approval ceiling.
        let detail = service
            .rebuild_lines(quote.id, &[line(3, 2, DiscountRate::Fifty)], None, &sales, now())
            .await
            .expect("edit approved quote");
        assert_eq!(detail.quote.status, QuoteStatus::PendingApproval);
        assert!(detail.quote.approved.is_none(), "stale approval must not survive the edit");
    }

    #[tokio::test]
    async fn mark_lost_records_the_reason() {
        let (service, _) = setup_service().await;
        let sales = actor(&service, 1).await;

        let quote = service.create_quote(create_input(), &sales, now()).await.expect("create");
        service
            .rebuild_lines(quote.id, &[line(3, 1, DiscountRate::None)], None, &sales, now())
            .await
            .expect("rebuild");
        service.close_internal(quote.id, &sales, now()).await.expect("close");
        service.mark_sent(quote.id, &sales, now()).await.expect("send");

        let error = service
            .mark_lost(quote.id, &sales, "  ", now())
            .await
            .expect_err("reason is required");
        assert!(matches!(
            error,
            ApplicationError::Domain(DomainError::Validation { field: "reason", .. })
        ));

        service
            .mark_lost(quote.id, &sales, "competitor undercut on price", now())
            .await
            .expect("lose");
        let stored = service.get_quote(quote.id).await.expect("detail").quote;
        assert_eq!(stored.status, QuoteStatus::Lost);
        assert_eq!(stored.lost_reason.as_deref(), Some("competitor undercut on price"));
    }

    #[tokio::test]
    async fn expiry_hits_open_quotes_only() {
        let (service, _) = setup_service().await;
        let sales = actor(&service, 1).await;

        let quote = service.create_quote(create_input(), &sales, now()).await.expect("create");
        let outcome = service.mark_expired(quote.id, now()).await.expect("expire draft");
        assert_eq!(outcome.to, QuoteStatus::Expired);

        let error = service
            .mark_expired(quote.id, now())
            .await
            .expect_err("expired is terminal");
        assert!(matches!(
            error,
            ApplicationError::Domain(DomainError::TransitionRejected { .. })
        ));
    }

    #[tokio::test]
    async fn list_scopes_sales_reps_to_their_own_quotes() {
        let (service, _) = setup_service().await;
        let sales = actor(&service, 1).await;
        let csr = actor(&service, 2).await;

        service.create_quote(create_input(), &sales, now()).await.expect("create");
        let assigned = CreateQuoteInput { owner_id: Some(ActorId(3)), ..create_input() };
        service.create_quote(assigned, &csr, now()).await.expect("create");

        let own = service
            .list_quotes(&QuoteListQuery::default(), &sales)
            .await
            .expect("list as sales");
        assert_eq!(own.len(), 1);
        assert!(own.iter().all(|quote| quote.owner_id == sales.id));

        let all = service.list_quotes(&QuoteListQuery::default(), &csr).await.expect("list as csr");
        assert_eq!(all.len(), 2);

        let filtered = service
            .list_quotes(
                &QuoteListQuery { owner_id: Some(ActorId(3)), ..QuoteListQuery::default() },
                &csr,
            )
            .await
            .expect("filtered list");
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].owner_id, ActorId(3));
    }

    #[tokio::test]
    async fn comments_append_and_list_newest_first() {
        let (service, _) = setup_service().await;
        let sales = actor(&service, 1).await;
        let quote = service.create_quote(create_input(), &sales, now()).await.expect("create");

        let error = service
            .add_comment(quote.id, &sales, "   ", now())
            .await
            .expect_err("blank comment");
        assert!(matches!(
            error,
            ApplicationError::Domain(DomainError::Validation { field: "body", .. })
        ));

        service
            .add_comment(quote.id, &sales, "waiting on customer PO", now())
            .await
            .expect("first comment");
        service
            .add_comment(quote.id, &sales, "PO received", now() + Duration::minutes(10))
            .await
            .expect("second comment");

        let comments = service.comments(quote.id).await.expect("list comments");
        assert_eq!(comments.len(), 2);
        assert_eq!(comments[0].body, "PO received");
    }

    #[tokio::test]
    async fn dashboard_scopes_non_managers_and_counts_monthly_wins() {
        let (service, _) = setup_service().await;
        let sales = actor(&service, 1).await;
        let csr = actor(&service, 2).await;
        let manager = actor(&service, 3).await;

        // One open quote for the rep, one won this month.
        service.create_quote(create_input(), &sales, now()).await.expect("create");
        let winner = service.create_quote(create_input(), &sales, now()).await.expect("create");
        service
            .rebuild_lines(winner.id, &[line(3, 1, DiscountRate::None)], None, &sales, now())
            .await
            .expect("rebuild");
        service.close_internal(winner.id, &sales, now()).await.expect("close");
        service.mark_sent(winner.id, &sales, now()).await.expect("send");
        service.mark_won(winner.id, &sales, now()).await.expect("win");

        // A CSR-owned open quote the rep must not see.
        let other = CreateQuoteInput { owner_id: Some(ActorId(2)), ..create_input() };
        service.create_quote(other, &csr, now()).await.expect("create");

        let mine = service.dashboard(&sales, now()).await.expect("dashboard as sales");
        assert_eq!(mine.open_count, 1);
        assert_eq!(mine.won_count, 1);
        assert!(mine.won_total > Decimal::ZERO);

        let org = service.dashboard(&manager, now()).await.expect("dashboard as manager");
        assert_eq!(org.open_count, 2);

        // A month later the won figures reset.
        let next_month = service
            .dashboard(&manager, now() + Duration::days(40))
            .await
            .expect("dashboard next month");
        assert_eq!(next_month.won_count, 0);
        assert_eq!(next_month.won_total, Decimal::ZERO);
    }

    #[tokio::test]
    async fn missing_quote_is_reported_as_not_found() {
        let (service, _) = setup_service().await;
        let error = service.get_quote(QuoteId(404)).await.expect_err("unknown quote");
        assert!(matches!(error, ApplicationError::NotFound(_)));
    }
}
