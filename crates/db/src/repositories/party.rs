use sqlx::{sqlite::SqliteRow, Row};

use bitquote_core::domain::actor::{Actor, ActorId, Role};
use bitquote_core::domain::party::{Contact, ContactId, Customer, CustomerId};

use super::RepositoryError;
use crate::DbPool;

/// Read-only access to the user and party directories. Both are maintained
/// elsewhere; quotes only look rows up by id.
pub struct SqlDirectoryRepository {
    pool: DbPool,
}

impl SqlDirectoryRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn find_actor(&self, id: ActorId) -> Result<Option<Actor>, RepositoryError> {
        let row = sqlx::query("SELECT id, first_name, last_name, role FROM app_user WHERE id = ?")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(actor_from_row).transpose()
    }

    pub async fn find_customer(
        &self,
        id: CustomerId,
    ) -> Result<Option<Customer>, RepositoryError> {
        let row = sqlx::query("SELECT id, name, slug FROM customer WHERE id = ?")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| Customer {
            id: CustomerId(row.get("id")),
            name: row.get("name"),
            slug: row.get("slug"),
        }))
    }

    pub async fn find_contact(&self, id: ContactId) -> Result<Option<Contact>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, customer_id, first_name, last_name, is_active FROM contact WHERE id = ?",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| Contact {
            id: ContactId(row.get("id")),
            customer_id: CustomerId(row.get("customer_id")),
            first_name: row.get("first_name"),
            last_name: row.get("last_name"),
            is_active: row.get::<i64, _>("is_active") != 0,
        }))
    }
}

fn actor_from_row(row: SqliteRow) -> Result<Actor, RepositoryError> {
    let role_raw = row.try_get::<String, _>("role")?;
    let role = Role::parse(&role_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown user role `{role_raw}`")))?;

    Ok(Actor {
        id: ActorId(row.try_get("id")?),
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        role,
    })
}
