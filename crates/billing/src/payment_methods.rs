//! Payment method display metadata
//!
//! Only non-sensitive display fields (brand, last four digits) are ever
//! stored; the provider keeps the instrument. Removal is a soft delete so
//! the audit trail survives.

use serde::Serialize;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};

/// One stored payment method, display fields only
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PaymentMethodRecord {
    pub id: Uuid,
    pub provider: String,
    pub brand: Option<String>,
    pub last_four: Option<String>,
    pub kind: String,
    pub is_default: bool,
    pub status: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Clone)]
pub struct PaymentMethodService {
    pool: PgPool,
}

impl PaymentMethodService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Record the card seen on a confirmed payment
    ///
    /// If the organization already has an active method with the same
    /// brand and last four, nothing changes. The first method an
    /// organization gets becomes its default.
    pub async fn upsert_from_payment(
        &self,
        org_id: Uuid,
        provider: &str,
        brand: Option<&str>,
        last_four: Option<&str>,
    ) -> BillingResult<()> {
        if brand.is_none() && last_four.is_none() {
            // Nothing displayable came with the payment
            return Ok(());
        }

        let existing: Option<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT id FROM payment_methods
            WHERE org_id = $1
              AND status = 'active'
              AND brand IS NOT DISTINCT FROM $2
              AND last_four IS NOT DISTINCT FROM $3
            LIMIT 1
            "#,
        )
        .bind(org_id)
        .bind(brand)
        .bind(last_four)
        .fetch_optional(&self.pool)
        .await?;

        if existing.is_some() {
            return Ok(());
        }

        let has_default: Option<(Uuid,)> = sqlx::query_as(
            "SELECT id FROM payment_methods WHERE org_id = $1 AND is_default = TRUE LIMIT 1",
        )
        .bind(org_id)
        .fetch_optional(&self.pool)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO payment_methods (id, org_id, provider, brand, last_four, kind, is_default, status)
            VALUES ($1, $2, $3, $4, $5, 'credit_card', $6, 'active')
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(org_id)
        .bind(provider)
        .bind(brand)
        .bind(last_four)
        .bind(has_default.is_none())
        .execute(&self.pool)
        .await?;

        tracing::info!(
            org_id = %org_id,
            brand = ?brand,
            "Payment method metadata recorded"
        );

        Ok(())
    }

    /// Make one method the default; clears the flag on the others first
    pub async fn set_default(&self, org_id: Uuid, method_id: Uuid) -> BillingResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE payment_methods SET is_default = FALSE WHERE org_id = $1")
            .bind(org_id)
            .execute(&mut *tx)
            .await?;

        let updated = sqlx::query(
            r#"
            UPDATE payment_methods
            SET is_default = TRUE, updated_at = NOW()
            WHERE id = $1 AND org_id = $2 AND status = 'active'
            "#,
        )
        .bind(method_id)
        .bind(org_id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(BillingError::PaymentMethodNotFound(method_id));
        }

        tx.commit().await?;
        Ok(())
    }

    /// Soft delete: the row stays for audit, the default flag is dropped
    pub async fn deactivate(&self, org_id: Uuid, method_id: Uuid) -> BillingResult<()> {
        sqlx::query(
            r#"
            UPDATE payment_methods
            SET status = 'inactive', is_default = FALSE, updated_at = NOW()
            WHERE id = $1 AND org_id = $2
            "#,
        )
        .bind(method_id)
        .bind(org_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Whether the organization has any active method on file
    pub async fn has_active(&self, org_id: Uuid) -> BillingResult<bool> {
        let row: Option<(Uuid,)> = sqlx::query_as(
            "SELECT id FROM payment_methods WHERE org_id = $1 AND status = 'active' LIMIT 1",
        )
        .bind(org_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.is_some())
    }

    /// Active methods for display, default first
    pub async fn list(&self, org_id: Uuid) -> BillingResult<Vec<PaymentMethodRecord>> {
        let rows: Vec<PaymentMethodRecord> = sqlx::query_as(
            r#"
            SELECT id, provider, brand, last_four, kind, is_default, status, created_at
            FROM payment_methods
            WHERE org_id = $1 AND status = 'active'
            ORDER BY is_default DESC, created_at DESC
            "#,
        )
        .bind(org_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}
