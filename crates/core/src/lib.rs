pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod identity;
pub mod pricing;
pub mod workflow;

pub use audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink};
pub use domain::actor::{Actor, ActorId, Role};
pub use domain::party::{Contact, ContactId, Customer, CustomerId};
pub use domain::product::{Product, ProductId, ProductType};
pub use domain::quote::{
    CommentId, DiscountRate, LineId, PaymentTerms, Quote, QuoteComment, QuoteId, QuoteLine,
    QuoteReference, QuoteSection, QuoteStatus, QuoteTotals, SectionId, WorkflowStamp,
};
pub use errors::{ApplicationError, DomainError};
pub use pricing::{LineInput, PlannedLine, PlannedSection, RebuildPlan};
pub use workflow::{
    ApprovalPolicy, QuoteReview, ThresholdApprovalPolicy, TransitionOutcome, WorkflowAction,
    WorkflowEngine,
};
