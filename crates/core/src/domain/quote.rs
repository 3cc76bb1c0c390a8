use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::domain::actor::ActorId;
use crate::domain::party::{ContactId, CustomerId};
use crate::domain::product::{ProductId, ProductType};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuoteId(pub i64);

/// The human-readable identifier (`BIT-MG-251028-00016`). Assigned once at
/// first persistence, immutable and globally unique afterwards.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuoteReference(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SectionId(pub i64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LineId(pub i64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommentId(pub i64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteStatus {
    Draft,
    PendingApproval,
    Approved,
    Sent,
    Won,
    Lost,
    Expired,
}

impl QuoteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuoteStatus::Draft => "DFT",
            QuoteStatus::PendingApproval => "RVW",
            QuoteStatus::Approved => "APP",
            QuoteStatus::Sent => "SNT",
            QuoteStatus::Won => "WON",
            QuoteStatus::Lost => "LST",
            QuoteStatus::Expired => "EXP",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "DFT" => Some(QuoteStatus::Draft),
            "RVW" => Some(QuoteStatus::PendingApproval),
            "APP" => Some(QuoteStatus::Approved),
            "SNT" => Some(QuoteStatus::Sent),
            "WON" => Some(QuoteStatus::Won),
            "LST" => Some(QuoteStatus::Lost),
            "EXP" => Some(QuoteStatus::Expired),
            _ => None,
        }
    }

    /// Line rebuilds are only allowed while the quote has not been sent.
    pub fn is_editable(&self) -> bool {
        matches!(
            self,
            QuoteStatus::Draft | QuoteStatus::PendingApproval | QuoteStatus::Approved
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, QuoteStatus::Won | QuoteStatus::Lost | QuoteStatus::Expired)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentTerms {
    #[default]
    Cash,
    Net7,
    Net15,
    Net30,
    Net60,
    Net90,
}

impl PaymentTerms {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentTerms::Cash => "CSH",
            PaymentTerms::Net7 => "N07",
            PaymentTerms::Net15 => "N15",
            PaymentTerms::Net30 => "N30",
            PaymentTerms::Net60 => "N60",
            PaymentTerms::Net90 => "N90",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "CSH" => Some(PaymentTerms::Cash),
            "N07" => Some(PaymentTerms::Net7),
            "N15" => Some(PaymentTerms::Net15),
            "N30" => Some(PaymentTerms::Net30),
            "N60" => Some(PaymentTerms::Net60),
            "N90" => Some(PaymentTerms::Net90),
            _ => None,
        }
    }
}

/// The fixed set of line discounts sales may grant.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum DiscountRate {
    #[default]
    None,
    Three,
    Five,
    Seven,
    Ten,
    Fifteen,
    Fifty,
    Hundred,
}

impl DiscountRate {
    pub const ALL: [DiscountRate; 8] = [
        DiscountRate::None,
        DiscountRate::Three,
        DiscountRate::Five,
        DiscountRate::Seven,
        DiscountRate::Ten,
        DiscountRate::Fifteen,
        DiscountRate::Fifty,
        DiscountRate::Hundred,
    ];

    pub fn percent(&self) -> u32 {
        match self {
            DiscountRate::None => 0,
            DiscountRate::Three => 3,
            DiscountRate::Five => 5,
            DiscountRate::Seven => 7,
            DiscountRate::Ten => 10,
            DiscountRate::Fifteen => 15,
            DiscountRate::Fifty => 50,
            DiscountRate::Hundred => 100,
        }
    }

    pub fn fraction(&self) -> Decimal {
        Decimal::new(i64::from(self.percent()), 2)
    }

    pub fn from_percent(percent: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|rate| rate.percent() == percent)
    }
}

impl TryFrom<u32> for DiscountRate {
    type Error = String;

    fn try_from(percent: u32) -> Result<Self, Self::Error> {
        Self::from_percent(percent)
            .ok_or_else(|| format!("unsupported discount percentage: {percent}"))
    }
}

impl From<DiscountRate> for u32 {
    fn from(rate: DiscountRate) -> Self {
        rate.percent()
    }
}

/// Monetary values always carry 2 decimal places, midpoint rounded away
/// from zero.
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteTotals {
    pub sub_total: Decimal,
    pub discount_total: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
}

/// Actor reference and timestamp recorded together with a workflow
/// transition. Both are always set atomically with the status change.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowStamp {
    pub by: ActorId,
    pub at: DateTime<Utc>,
}

impl WorkflowStamp {
    pub fn new(by: ActorId, at: DateTime<Utc>) -> Self {
        Self { by, at }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub id: QuoteId,
    pub reference: Option<QuoteReference>,
    pub customer_id: CustomerId,
    pub contact_id: ContactId,
    pub owner_id: ActorId,
    pub status: QuoteStatus,
    pub payment_terms: PaymentTerms,
    pub valid_until: Option<NaiveDate>,
    pub totals: QuoteTotals,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: ActorId,
    pub updated_by: ActorId,
    pub approved: Option<WorkflowStamp>,
    pub sent: Option<WorkflowStamp>,
    pub won: Option<WorkflowStamp>,
    pub lost: Option<WorkflowStamp>,
    pub lost_reason: Option<String>,
}

impl Quote {
    /// True once the identity assigner has run; `reference` and
    /// `valid_until` are only ever null together, before the first save.
    pub fn has_identity(&self) -> bool {
        self.reference.is_some() && self.valid_until.is_some()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteSection {
    pub id: SectionId,
    pub quote_id: QuoteId,
    pub product_type: ProductType,
    pub name: String,
    pub position: u32,
    pub subtotal: Decimal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteLine {
    pub id: LineId,
    pub quote_id: QuoteId,
    pub section_id: SectionId,
    pub product_id: ProductId,
    pub description: String,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub discount: DiscountRate,
    pub delivery_days: u32,
    pub position: u32,
}

impl QuoteLine {
    pub fn gross_total(&self) -> Decimal {
        round_money(self.unit_price * Decimal::from(self.quantity))
    }

    pub fn discount_value(&self) -> Decimal {
        round_money(self.gross_total() * self.discount.fraction())
    }

    pub fn net_total(&self) -> Decimal {
        self.gross_total() - self.discount_value()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteComment {
    pub id: CommentId,
    pub quote_id: QuoteId,
    pub author_id: ActorId,
    pub body: String,
    pub created_at: DateTime<Utc>,
}
