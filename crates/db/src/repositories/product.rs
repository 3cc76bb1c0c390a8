use std::collections::HashMap;
use std::str::FromStr;

use sqlx::{sqlite::SqliteRow, QueryBuilder, Row};

use bitquote_core::domain::product::{Product, ProductId, ProductType};
use rust_decimal::Decimal;

use super::RepositoryError;
use crate::DbPool;

/// Read-only catalog lookup. The catalog is maintained elsewhere; line
/// rebuilds resolve all referenced products in one batched query.
pub struct SqlProductRepository {
    pool: DbPool,
}

impl SqlProductRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_id(&self, id: ProductId) -> Result<Option<Product>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, sku, name, price, price_editable, product_type, is_active
             FROM product
             WHERE id = ?",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(product_from_row).transpose()
    }

    pub async fn find_by_ids(
        &self,
        ids: &[ProductId],
    ) -> Result<HashMap<ProductId, Product>, RepositoryError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let mut builder = QueryBuilder::new(
            "SELECT id, sku, name, price, price_editable, product_type, is_active
             FROM product WHERE id IN (",
        );
        let mut separated = builder.separated(", ");
        for id in ids {
            separated.push_bind(id.0);
        }
        separated.push_unseparated(")");

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.into_iter()
            .map(|row| product_from_row(row).map(|product| (product.id, product)))
            .collect()
    }
}

fn product_from_row(row: SqliteRow) -> Result<Product, RepositoryError> {
    let type_raw = row.try_get::<String, _>("product_type")?;
    let product_type = ProductType::parse(&type_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown product type `{type_raw}`")))?;

    Ok(Product {
        id: ProductId(row.try_get("id")?),
        sku: row.try_get("sku")?,
        name: row.try_get("name")?,
        price: parse_decimal("price", row.try_get("price")?)?,
        price_editable: row.try_get::<i64, _>("price_editable")? != 0,
        product_type,
        is_active: row.try_get::<i64, _>("is_active")? != 0,
    })
}

pub(crate) fn parse_decimal(column: &str, value: String) -> Result<Decimal, RepositoryError> {
    Decimal::from_str(&value).map_err(|error| {
        RepositoryError::Decode(format!("invalid decimal in `{column}`: `{value}` ({error})"))
    })
}
