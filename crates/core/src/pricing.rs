//! Line and section engine.
//!
//! A quote edit always submits the full replacement set of desired lines.
//! `plan_rebuild` turns that set into priced lines grouped into
//! per-product-type sections, plus refreshed header totals. The plan is
//! pure data; persisting it (delete old rows, insert the plan) is the
//! repository's job and happens in a single transaction.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::product::{Product, ProductId, ProductType};
use crate::domain::quote::{round_money, DiscountRate, QuoteTotals};
use crate::errors::DomainError;

/// Line descriptions snapshot the product name at rebuild time and stay
/// fixed through later catalog renames.
pub const DESCRIPTION_MAX_CHARS: usize = 100;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineInput {
    pub product_id: ProductId,
    pub quantity: u32,
    pub discount: DiscountRate,
    #[serde(default)]
    pub delivery_days: u32,
    /// Honored only when the catalog marks the product's price editable.
    #[serde(default)]
    pub unit_price: Option<Decimal>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedLine {
    pub product_id: ProductId,
    pub description: String,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub discount: DiscountRate,
    pub delivery_days: u32,
    pub gross_total: Decimal,
    pub discount_value: Decimal,
    pub net_total: Decimal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedSection {
    pub product_type: ProductType,
    pub name: String,
    pub subtotal: Decimal,
    pub lines: Vec<PlannedLine>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebuildPlan {
    pub sections: Vec<PlannedSection>,
    pub totals: QuoteTotals,
}

impl RebuildPlan {
    pub fn line_count(&self) -> usize {
        self.sections.iter().map(|section| section.lines.len()).sum()
    }

    /// Steepest discount granted on any line; feeds the approval policy.
    pub fn max_discount(&self) -> DiscountRate {
        self.sections
            .iter()
            .flat_map(|section| &section.lines)
            .map(|line| line.discount)
            .max_by_key(DiscountRate::percent)
            .unwrap_or_default()
    }
}

/// Builds the replacement plan for `inputs` against the resolved catalog
/// subset. Sections appear in first-encounter order of their product type;
/// lines keep submitted order. The first invalid line aborts the whole
/// rebuild with its index, so nothing is ever partially applied.
pub fn plan_rebuild(
    inputs: &[LineInput],
    products: &HashMap<ProductId, Product>,
    tax_rate: Decimal,
) -> Result<RebuildPlan, DomainError> {
    let mut sections: Vec<PlannedSection> = Vec::new();
    let mut section_index: HashMap<ProductType, usize> = HashMap::new();

    for (index, input) in inputs.iter().enumerate() {
        validate_line(index, input)?;
        let product = products
            .get(&input.product_id)
            .ok_or(DomainError::UnknownProduct { index, product_id: input.product_id.0 })?;

        let unit_price = resolve_unit_price(product, input.unit_price);
        let description = snapshot_description(input.description.as_deref(), &product.name);

        let gross_total = round_money(unit_price * Decimal::from(input.quantity));
        let discount_value = round_money(gross_total * input.discount.fraction());
        let line = PlannedLine {
            product_id: product.id,
            description,
            quantity: input.quantity,
            unit_price,
            discount: input.discount,
            delivery_days: input.delivery_days,
            gross_total,
            discount_value,
            net_total: gross_total - discount_value,
        };

        let slot = *section_index.entry(product.product_type).or_insert_with(|| {
            sections.push(PlannedSection {
                product_type: product.product_type,
                name: product.product_type.label().to_owned(),
                subtotal: Decimal::ZERO,
                lines: Vec::new(),
            });
            sections.len() - 1
        });
        sections[slot].subtotal += line.net_total;
        sections[slot].lines.push(line);
    }

    let totals = compute_totals(&sections, tax_rate);
    Ok(RebuildPlan { sections, totals })
}

/// Catalog price wins unless the product allows overrides; a negative
/// override is clamped to zero rather than rejected.
pub fn resolve_unit_price(product: &Product, requested: Option<Decimal>) -> Decimal {
    match requested {
        Some(price) if product.price_editable => price.max(Decimal::ZERO),
        _ => product.price,
    }
}

fn validate_line(index: usize, input: &LineInput) -> Result<(), DomainError> {
    if input.quantity < 1 {
        return Err(DomainError::LineValidation {
            index,
            reason: "quantity must be at least 1".to_owned(),
        });
    }
    Ok(())
}

fn snapshot_description(explicit: Option<&str>, product_name: &str) -> String {
    let source = match explicit.map(str::trim) {
        Some(text) if !text.is_empty() => text,
        _ => product_name,
    };
    source.chars().take(DESCRIPTION_MAX_CHARS).collect()
}

fn compute_totals(sections: &[PlannedSection], tax_rate: Decimal) -> QuoteTotals {
    let mut sub_total = Decimal::ZERO;
    let mut discount_total = Decimal::ZERO;
    for line in sections.iter().flat_map(|section| &section.lines) {
        sub_total += line.gross_total;
        discount_total += line.discount_value;
    }
    let tax = round_money((sub_total - discount_total) * tax_rate);
    QuoteTotals { sub_total, discount_total, tax, total: sub_total - discount_total + tax }
}
