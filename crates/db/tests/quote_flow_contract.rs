//! End-to-end contract over the seeded database: a quote travels from
//! DRAFT through approval and send to WON, and every intermediate state is
//! observable through the public service surface.

use chrono::{DateTime, Utc};

use bitquote_core::config::{ApprovalConfig, PricingConfig};
use bitquote_core::domain::actor::ActorId;
use bitquote_core::domain::party::{ContactId, CustomerId};
use bitquote_core::domain::product::ProductId;
use bitquote_core::domain::quote::{DiscountRate, PaymentTerms, QuoteStatus};
use bitquote_core::pricing::LineInput;
use bitquote_db::{
    connect_with_settings, migrations, CreateQuoteInput, QuoteService, SeedDataset,
};
use rust_decimal::Decimal;

fn now() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2025-10-28T15:00:00Z")
        .expect("valid rfc3339")
        .with_timezone(&Utc)
}

async fn setup_service() -> QuoteService {
    let pool = connect_with_settings("sqlite::memory:", 1, 30)
        .await
        .expect("connect test pool");
    migrations::run_pending(&pool).await.expect("run migrations");
    SeedDataset::load(&pool).await.expect("load seed fixtures");
    let verification = SeedDataset::verify(&pool).await.expect("verify seed fixtures");
    assert!(verification.all_present, "failed checks: {:?}", verification.checks);

    QuoteService::new(
        pool,
        &PricingConfig { tax_rate: Decimal::new(16, 2) },
        &ApprovalConfig { max_auto_discount_pct: 10, max_auto_total: Decimal::new(250_000_00, 2) },
    )
}

#[tokio::test]
async fn seeded_quote_walks_the_full_workflow() {
    let service = setup_service().await;
    let sales = service.resolve_actor(ActorId(1)).await.expect("sales rep");
    let manager = service.resolve_actor(ActorId(3)).await.expect("manager");

    let quote = service
        .create_quote(
            CreateQuoteInput {
                customer_id: CustomerId(1),
                contact_id: ContactId(1),
                owner_id: None,
                payment_terms: PaymentTerms::Net30,
            },
            &sales,
            now(),
        )
        .await
        .expect("create quote");
    assert_eq!(
        quote.reference.as_ref().expect("reference").0,
        format!("BIT-MG-251028-{:05}", quote.id.0),
    );

    // Equipment over the ceiling plus a steep consumable discount: this
    // cannot auto-approve.
    let detail = service
        .rebuild_lines(
            quote.id,
            &[
                LineInput {
                    product_id: ProductId(1),
                    quantity: 2,
                    discount: DiscountRate::None,
                    delivery_days: 30,
                    unit_price: None,
                    description: None,
                },
                LineInput {
                    product_id: ProductId(3),
                    quantity: 10,
                    discount: DiscountRate::Fifty,
                    delivery_days: 5,
                    unit_price: None,
                    description: None,
                },
            ],
            None,
            &sales,
            now(),
        )
        .await
        .expect("rebuild lines");
    assert_eq!(detail.sections.len(), 2);
    assert_eq!(detail.quote.totals.sub_total, Decimal::new(251_999_90, 2));

    let closed = service.close_internal(quote.id, &sales, now()).await.expect("close");
    assert_eq!(closed.to, QuoteStatus::PendingApproval);

    let approved = service.approve(quote.id, &manager, now()).await.expect("approve");
    assert_eq!(approved.to, QuoteStatus::Approved);

    let sent = service.mark_sent(quote.id, &sales, now()).await.expect("send");
    assert_eq!(sent.to, QuoteStatus::Sent);

    let won = service.mark_won(quote.id, &sales, now()).await.expect("win");
    assert_eq!(won.to, QuoteStatus::Won);

    let stored = service.get_quote(quote.id).await.expect("detail").quote;
    assert_eq!(stored.status, QuoteStatus::Won);
    assert!(stored.approved.is_some());
    assert!(stored.sent.is_some());
    assert!(stored.won.is_some());

    let dashboard = service.dashboard(&manager, now()).await.expect("dashboard");
    assert_eq!(dashboard.won_count, 1);
    assert_eq!(dashboard.won_total, stored.totals.total);
}
