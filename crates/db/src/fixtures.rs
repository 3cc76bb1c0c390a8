use sqlx::Executor;

use crate::repositories::RepositoryError;
use crate::DbPool;

const SEED_USER_COUNT: i64 = 4;
const SEED_CUSTOMER_COUNT: i64 = 2;
const SEED_CONTACT_COUNT: i64 = 3;
const SEED_PRODUCT_COUNT: i64 = 6;

/// Deterministic demo directory and catalog: one user per role, two
/// customers with active and inactive contacts, and one product per
/// catalog type (plus a second equipment item). Quotes are created through
/// the service, never seeded.
pub struct SeedDataset;

impl SeedDataset {
    pub const SQL: &str = include_str!("../../../config/fixtures/demo_seed.sql");

    pub async fn load(pool: &DbPool) -> Result<(), RepositoryError> {
        let mut tx = pool.begin().await?;
        tx.execute(sqlx::query(Self::SQL)).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Checks the contract the demo data promises to tests and smoke runs.
    pub async fn verify(pool: &DbPool) -> Result<SeedVerification, RepositoryError> {
        let mut checks = Vec::new();

        checks.push(("user-count", count(pool, "app_user").await? == SEED_USER_COUNT));
        checks.push(("customer-count", count(pool, "customer").await? == SEED_CUSTOMER_COUNT));
        checks.push(("contact-count", count(pool, "contact").await? == SEED_CONTACT_COUNT));
        checks.push(("product-count", count(pool, "product").await? == SEED_PRODUCT_COUNT));

        let roles: i64 = sqlx::query_scalar(
            "SELECT COUNT(DISTINCT role) FROM app_user WHERE role IN ('S', 'C', 'M', 'A')",
        )
        .fetch_one(pool)
        .await?;
        checks.push(("one-user-per-role", roles == 4));

        let inactive_contact: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM contact WHERE is_active = 0")
                .fetch_one(pool)
                .await?;
        checks.push(("inactive-contact-present", inactive_contact == 1));

        let editable_products: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM product WHERE price_editable = 1")
                .fetch_one(pool)
                .await?;
        checks.push(("editable-priced-products", editable_products == 2));

        let product_types: i64 =
            sqlx::query_scalar("SELECT COUNT(DISTINCT product_type) FROM product")
                .fetch_one(pool)
                .await?;
        checks.push(("all-product-types-covered", product_types == 5));

        let all_present = checks.iter().all(|(_, passed)| *passed);
        Ok(SeedVerification { all_present, checks })
    }

    pub async fn clean(pool: &DbPool) -> Result<(), RepositoryError> {
        let mut tx = pool.begin().await?;
        sqlx::query("DELETE FROM product WHERE id BETWEEN 1 AND 6").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM contact WHERE id BETWEEN 1 AND 3").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM customer WHERE id BETWEEN 1 AND 2").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM app_user WHERE id BETWEEN 1 AND 4").execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }
}

async fn count(pool: &DbPool, table: &str) -> Result<i64, RepositoryError> {
    Ok(sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}")).fetch_one(pool).await?)
}

#[derive(Debug)]
pub struct SeedVerification {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}
