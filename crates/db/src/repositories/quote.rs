use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use sqlx::{sqlite::SqliteRow, QueryBuilder, Row};

use bitquote_core::domain::actor::ActorId;
use bitquote_core::domain::party::{ContactId, CustomerId};
use bitquote_core::domain::product::{ProductId, ProductType};
use bitquote_core::domain::quote::{
    CommentId, DiscountRate, LineId, PaymentTerms, Quote, QuoteComment, QuoteId, QuoteLine,
    QuoteReference, QuoteSection, QuoteStatus, QuoteTotals, SectionId, WorkflowStamp,
};
use bitquote_core::pricing::RebuildPlan;
use rust_decimal::Decimal;

use super::product::parse_decimal;
use super::RepositoryError;
use crate::DbPool;

const QUOTE_COLUMNS: &str = "id, reference, customer_id, contact_id, owner_id, status, \
     payment_terms, valid_until, sub_total, discount_total, tax, total, is_active, \
     created_at, updated_at, created_by, updated_by, approved_by, approved_at, \
     sent_by, sent_at, won_by, won_at, lost_by, lost_at, lost_reason";

pub struct SqlQuoteRepository {
    pool: DbPool,
}

/// Header values for the initial DRAFT insert. `reference` and
/// `valid_until` stay NULL here; the identity assigner fills them in a
/// second write immediately afterwards.
#[derive(Clone, Debug)]
pub struct NewQuoteRow {
    pub customer_id: CustomerId,
    pub contact_id: ContactId,
    pub owner_id: ActorId,
    pub payment_terms: PaymentTerms,
    pub created_by: ActorId,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Default)]
pub struct QuoteListFilter {
    pub customer_id: Option<CustomerId>,
    pub owner_id: Option<ActorId>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SectionDetail {
    pub section: QuoteSection,
    pub lines: Vec<QuoteLine>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct QuoteDetail {
    pub quote: Quote,
    pub sections: Vec<SectionDetail>,
    pub comments: Vec<QuoteComment>,
}

impl QuoteDetail {
    pub fn lines(&self) -> impl Iterator<Item = &QuoteLine> {
        self.sections.iter().flat_map(|section| section.lines.iter())
    }

    /// Steepest line discount, for the approval policy review.
    pub fn max_discount_pct(&self) -> u32 {
        self.lines().map(|line| line.discount.percent()).max().unwrap_or(0)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DashboardSnapshot {
    pub open_count: i64,
    pub pending_approval_count: i64,
    pub sent_count: i64,
    pub won_count: i64,
    pub won_total: Decimal,
}

impl SqlQuoteRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn insert_draft(&self, row: &NewQuoteRow) -> Result<QuoteId, RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO quote (
                customer_id, contact_id, owner_id, status, payment_terms,
                is_active, created_at, updated_at, created_by, updated_by
             ) VALUES (?, ?, ?, 'DFT', ?, 1, ?, ?, ?, ?)",
        )
        .bind(row.customer_id.0)
        .bind(row.contact_id.0)
        .bind(row.owner_id.0)
        .bind(row.payment_terms.as_str())
        .bind(row.created_at.to_rfc3339())
        .bind(row.created_at.to_rfc3339())
        .bind(row.created_by.0)
        .bind(row.created_by.0)
        .execute(&self.pool)
        .await?;

        Ok(QuoteId(result.last_insert_rowid()))
    }

    /// Second-phase identity write. The `reference IS NULL` guard makes a
    /// repeat invocation a no-op, so the identifier can never be reissued.
    pub async fn set_identity(
        &self,
        id: QuoteId,
        reference: &QuoteReference,
        valid_until: NaiveDate,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE quote SET reference = ?, valid_until = ?
             WHERE id = ? AND reference IS NULL",
        )
        .bind(&reference.0)
        .bind(valid_until.format("%Y-%m-%d").to_string())
        .bind(id.0)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn find_by_id(&self, id: QuoteId) -> Result<Option<Quote>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {QUOTE_COLUMNS} FROM quote WHERE id = ?"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(quote_from_row).transpose()
    }

    pub async fn find_detail(&self, id: QuoteId) -> Result<Option<QuoteDetail>, RepositoryError> {
        let Some(quote) = self.find_by_id(id).await? else {
            return Ok(None);
        };

        let section_rows = sqlx::query(
            "SELECT id, quote_id, product_type, name, position, subtotal
             FROM quote_section
             WHERE quote_id = ?
             ORDER BY position ASC",
        )
        .bind(id.0)
        .fetch_all(&self.pool)
        .await?;

        let line_rows = sqlx::query(
            "SELECT id, quote_id, section_id, product_id, description, quantity,
                    unit_price, discount_pct, delivery_days, position
             FROM quote_line
             WHERE quote_id = ?
             ORDER BY position ASC",
        )
        .bind(id.0)
        .fetch_all(&self.pool)
        .await?;

        let lines =
            line_rows.into_iter().map(line_from_row).collect::<Result<Vec<_>, _>>()?;

        let mut sections = Vec::new();
        for row in section_rows {
            let section = section_from_row(row)?;
            let section_lines =
                lines.iter().filter(|line| line.section_id == section.id).cloned().collect();
            sections.push(SectionDetail { section, lines: section_lines });
        }

        let comments = self.comments_for(id).await?;
        Ok(Some(QuoteDetail { quote, sections, comments }))
    }

    pub async fn list(&self, filter: &QuoteListFilter) -> Result<Vec<Quote>, RepositoryError> {
        let mut builder =
            QueryBuilder::new(format!("SELECT {QUOTE_COLUMNS} FROM quote WHERE is_active = 1"));
        if let Some(customer_id) = filter.customer_id {
            builder.push(" AND customer_id = ").push_bind(customer_id.0);
        }
        if let Some(owner_id) = filter.owner_id {
            builder.push(" AND owner_id = ").push_bind(owner_id.0);
        }
        builder.push(" ORDER BY created_at DESC, id DESC");

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.into_iter().map(quote_from_row).collect()
    }

    /// Applies a rebuild plan: refreshes the header (totals, payment
    /// terms, review status, audit fields), then replaces every section
    /// and line. One transaction; a failure anywhere leaves the previous
    /// line set intact.
    pub async fn replace_lines(
        &self,
        quote: &Quote,
        plan: &RebuildPlan,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE quote SET
                status = ?, payment_terms = ?,
                sub_total = ?, discount_total = ?, tax = ?, total = ?,
                updated_at = ?, updated_by = ?,
                approved_by = ?, approved_at = ?
             WHERE id = ?",
        )
        .bind(quote.status.as_str())
        .bind(quote.payment_terms.as_str())
        .bind(quote.totals.sub_total.to_string())
        .bind(quote.totals.discount_total.to_string())
        .bind(quote.totals.tax.to_string())
        .bind(quote.totals.total.to_string())
        .bind(quote.updated_at.to_rfc3339())
        .bind(quote.updated_by.0)
        .bind(quote.approved.as_ref().map(|stamp| stamp.by.0))
        .bind(quote.approved.as_ref().map(|stamp| stamp.at.to_rfc3339()))
        .bind(quote.id.0)
        .execute(&mut *tx)
        .await?;

        // Lines first, then sections: a line never outlives its section.
        sqlx::query("DELETE FROM quote_line WHERE quote_id = ?")
            .bind(quote.id.0)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM quote_section WHERE quote_id = ?")
            .bind(quote.id.0)
            .execute(&mut *tx)
            .await?;

        let mut line_position: u32 = 0;
        for (section_position, section) in plan.sections.iter().enumerate() {
            let section_result = sqlx::query(
                "INSERT INTO quote_section (quote_id, product_type, name, position, subtotal)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(quote.id.0)
            .bind(section.product_type.as_str())
            .bind(&section.name)
            .bind(section_position as i64)
            .bind(section.subtotal.to_string())
            .execute(&mut *tx)
            .await?;
            let section_id = section_result.last_insert_rowid();

            for line in &section.lines {
                sqlx::query(
                    "INSERT INTO quote_line (
                        quote_id, section_id, product_id, description, quantity,
                        unit_price, discount_pct, delivery_days, position
                     ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(quote.id.0)
                .bind(section_id)
                .bind(line.product_id.0)
                .bind(&line.description)
                .bind(i64::from(line.quantity))
                .bind(line.unit_price.to_string())
                .bind(i64::from(line.discount.percent()))
                .bind(i64::from(line.delivery_days))
                .bind(i64::from(line_position))
                .execute(&mut *tx)
                .await?;
                line_position += 1;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    /// Persists a workflow transition. The status/stamp columns move in a
    /// single conditional UPDATE, so attribution is atomic with the status
    /// change and a stale precondition writes nothing.
    pub async fn update_workflow(
        &self,
        quote: &Quote,
        expected: QuoteStatus,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE quote SET
                status = ?, updated_at = ?, updated_by = ?,
                approved_by = ?, approved_at = ?,
                sent_by = ?, sent_at = ?,
                won_by = ?, won_at = ?,
                lost_by = ?, lost_at = ?, lost_reason = ?
             WHERE id = ? AND status = ?",
        )
        .bind(quote.status.as_str())
        .bind(quote.updated_at.to_rfc3339())
        .bind(quote.updated_by.0)
        .bind(quote.approved.as_ref().map(|stamp| stamp.by.0))
        .bind(quote.approved.as_ref().map(|stamp| stamp.at.to_rfc3339()))
        .bind(quote.sent.as_ref().map(|stamp| stamp.by.0))
        .bind(quote.sent.as_ref().map(|stamp| stamp.at.to_rfc3339()))
        .bind(quote.won.as_ref().map(|stamp| stamp.by.0))
        .bind(quote.won.as_ref().map(|stamp| stamp.at.to_rfc3339()))
        .bind(quote.lost.as_ref().map(|stamp| stamp.by.0))
        .bind(quote.lost.as_ref().map(|stamp| stamp.at.to_rfc3339()))
        .bind(quote.lost_reason.as_deref())
        .bind(quote.id.0)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn add_comment(
        &self,
        quote_id: QuoteId,
        author_id: ActorId,
        body: &str,
        created_at: DateTime<Utc>,
    ) -> Result<QuoteComment, RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO quote_comment (quote_id, author_id, body, created_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(quote_id.0)
        .bind(author_id.0)
        .bind(body)
        .bind(created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(QuoteComment {
            id: CommentId(result.last_insert_rowid()),
            quote_id,
            author_id,
            body: body.to_owned(),
            created_at,
        })
    }

    pub async fn comments_for(
        &self,
        quote_id: QuoteId,
    ) -> Result<Vec<QuoteComment>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, quote_id, author_id, body, created_at
             FROM quote_comment
             WHERE quote_id = ?
             ORDER BY created_at DESC, id DESC",
        )
        .bind(quote_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(comment_from_row).collect()
    }

    /// Open-pipeline counts plus current-month won figures, optionally
    /// scoped to one owner.
    pub async fn dashboard(
        &self,
        owner_id: Option<ActorId>,
        now: DateTime<Utc>,
    ) -> Result<DashboardSnapshot, RepositoryError> {
        let mut builder = QueryBuilder::new(
            "SELECT status, COUNT(*) AS count FROM quote
             WHERE is_active = 1 AND status IN ('DFT', 'RVW', 'APP', 'SNT')",
        );
        if let Some(owner_id) = owner_id {
            builder.push(" AND owner_id = ").push_bind(owner_id.0);
        }
        builder.push(" GROUP BY status");

        let mut snapshot = DashboardSnapshot::default();
        for row in builder.build().fetch_all(&self.pool).await? {
            let status: String = row.try_get("status")?;
            let count: i64 = row.try_get("count")?;
            snapshot.open_count += count;
            match status.as_str() {
                "RVW" => snapshot.pending_approval_count = count,
                "SNT" => snapshot.sent_count = count,
                _ => {}
            }
        }

        let month_prefix = format!("{}%", now.format("%Y-%m"));
        let mut builder = QueryBuilder::new(
            "SELECT total FROM quote
             WHERE is_active = 1 AND status = 'WON' AND won_at LIKE ",
        );
        builder.push_bind(month_prefix);
        if let Some(owner_id) = owner_id {
            builder.push(" AND owner_id = ").push_bind(owner_id.0);
        }

        for row in builder.build().fetch_all(&self.pool).await? {
            snapshot.won_count += 1;
            snapshot.won_total += parse_decimal("total", row.try_get("total")?)?;
        }

        Ok(snapshot)
    }
}

fn quote_from_row(row: SqliteRow) -> Result<Quote, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = QuoteStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown quote status `{status_raw}`")))?;

    let terms_raw = row.try_get::<String, _>("payment_terms")?;
    let payment_terms = PaymentTerms::parse(&terms_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown payment terms `{terms_raw}`")))?;

    Ok(Quote {
        id: QuoteId(row.try_get("id")?),
        reference: row.try_get::<Option<String>, _>("reference")?.map(QuoteReference),
        customer_id: CustomerId(row.try_get("customer_id")?),
        contact_id: ContactId(row.try_get("contact_id")?),
        owner_id: ActorId(row.try_get("owner_id")?),
        status,
        payment_terms,
        valid_until: parse_optional_date("valid_until", row.try_get("valid_until")?)?,
        totals: QuoteTotals {
            sub_total: parse_decimal("sub_total", row.try_get("sub_total")?)?,
            discount_total: parse_decimal("discount_total", row.try_get("discount_total")?)?,
            tax: parse_decimal("tax", row.try_get("tax")?)?,
            total: parse_decimal("total", row.try_get("total")?)?,
        },
        is_active: row.try_get::<i64, _>("is_active")? != 0,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
        created_by: ActorId(row.try_get("created_by")?),
        updated_by: ActorId(row.try_get("updated_by")?),
        approved: stamp_from_row(&row, "approved_by", "approved_at")?,
        sent: stamp_from_row(&row, "sent_by", "sent_at")?,
        won: stamp_from_row(&row, "won_by", "won_at")?,
        lost: stamp_from_row(&row, "lost_by", "lost_at")?,
        lost_reason: row.try_get("lost_reason")?,
    })
}

fn section_from_row(row: SqliteRow) -> Result<QuoteSection, RepositoryError> {
    let type_raw = row.try_get::<String, _>("product_type")?;
    let product_type = ProductType::parse(&type_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown product type `{type_raw}`")))?;

    Ok(QuoteSection {
        id: SectionId(row.try_get("id")?),
        quote_id: QuoteId(row.try_get("quote_id")?),
        product_type,
        name: row.try_get("name")?,
        position: parse_u32("position", row.try_get("position")?)?,
        subtotal: parse_decimal("subtotal", row.try_get("subtotal")?)?,
    })
}

fn line_from_row(row: SqliteRow) -> Result<QuoteLine, RepositoryError> {
    let discount_pct = parse_u32("discount_pct", row.try_get("discount_pct")?)?;
    let discount = DiscountRate::from_percent(discount_pct).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown discount percentage `{discount_pct}`"))
    })?;

    Ok(QuoteLine {
        id: LineId(row.try_get("id")?),
        quote_id: QuoteId(row.try_get("quote_id")?),
        section_id: SectionId(row.try_get("section_id")?),
        product_id: ProductId(row.try_get("product_id")?),
        description: row.try_get("description")?,
        quantity: parse_u32("quantity", row.try_get("quantity")?)?,
        unit_price: parse_decimal("unit_price", row.try_get("unit_price")?)?,
        discount,
        delivery_days: parse_u32("delivery_days", row.try_get("delivery_days")?)?,
        position: parse_u32("position", row.try_get("position")?)?,
    })
}

fn comment_from_row(row: SqliteRow) -> Result<QuoteComment, RepositoryError> {
    Ok(QuoteComment {
        id: CommentId(row.try_get("id")?),
        quote_id: QuoteId(row.try_get("quote_id")?),
        author_id: ActorId(row.try_get("author_id")?),
        body: row.try_get("body")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

fn stamp_from_row(
    row: &SqliteRow,
    by_column: &str,
    at_column: &str,
) -> Result<Option<WorkflowStamp>, RepositoryError> {
    let by: Option<i64> = row.try_get(by_column)?;
    let at: Option<String> = row.try_get(at_column)?;

    match (by, at) {
        (Some(by), Some(at)) => Ok(Some(WorkflowStamp {
            by: ActorId(by),
            at: parse_timestamp(at_column, at)?,
        })),
        (None, None) => Ok(None),
        _ => Err(RepositoryError::Decode(format!(
            "workflow stamp `{by_column}`/`{at_column}` is only partially set"
        ))),
    }
}

fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}

fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

fn parse_optional_date(
    column: &str,
    value: Option<String>,
) -> Result<Option<NaiveDate>, RepositoryError> {
    value
        .map(|date| {
            NaiveDate::parse_from_str(&date, "%Y-%m-%d").map_err(|error| {
                RepositoryError::Decode(format!("invalid date in `{column}`: `{date}` ({error})"))
            })
        })
        .transpose()
}
