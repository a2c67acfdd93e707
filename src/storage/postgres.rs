use std::collections::HashMap;
use std::ops::{Deref, DerefMut};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::pool::PoolConnection;
use sqlx::{PgConnection, PgPool, Postgres};

use super::{OrderStore, Scope, StoreError, StoreResult};
use crate::domain::order::{Order, OrderRecord, OrderStatus, Pagination};

// ============================================================================
// PostgreSQL Order Store
// ============================================================================
//
// Expected schema:
//
//   orders(id BIGSERIAL PK, recipient_id BIGINT, expiration_date TIMESTAMPTZ,
//          delivered_date TIMESTAMPTZ NULL, refunded_date TIMESTAMPTZ NULL,
//          returned_date TIMESTAMPTZ NULL, status TEXT,
//          weight DOUBLE PRECISION, worth DOUBLE PRECISION)
//
//   order_records(id BIGSERIAL PK, order_id BIGINT REFERENCES orders(id),
//                 timestamp TIMESTAMPTZ, status TEXT, description TEXT)
//
// History lives in its own table and is joined onto orders in memory.
//
// ============================================================================

#[derive(Clone)]
pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn acquire<'c>(&self, scope: Scope<'c, PgConnection>) -> StoreResult<PgConn<'c>> {
        match scope {
            Scope::Pool => Ok(PgConn::Pooled(self.pool.acquire().await?)),
            Scope::Tx(conn) => Ok(PgConn::Borrowed(conn)),
        }
    }
}

/// A connection borrowed from the open transaction or checked out of the pool.
enum PgConn<'c> {
    Pooled(PoolConnection<Postgres>),
    Borrowed(&'c mut PgConnection),
}

impl Deref for PgConn<'_> {
    type Target = PgConnection;

    fn deref(&self) -> &PgConnection {
        match self {
            PgConn::Pooled(conn) => conn,
            PgConn::Borrowed(conn) => conn,
        }
    }
}

impl DerefMut for PgConn<'_> {
    fn deref_mut(&mut self) -> &mut PgConnection {
        match self {
            PgConn::Pooled(conn) => conn,
            PgConn::Borrowed(conn) => conn,
        }
    }
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: i64,
    recipient_id: i64,
    expiration_date: DateTime<Utc>,
    delivered_date: Option<DateTime<Utc>>,
    refunded_date: Option<DateTime<Utc>>,
    returned_date: Option<DateTime<Utc>>,
    status: String,
    weight: f64,
    worth: f64,
}

impl OrderRow {
    fn into_order(self, history: Vec<OrderRecord>) -> StoreResult<Order> {
        Ok(Order {
            id: self.id,
            recipient_id: self.recipient_id,
            status: parse_status(&self.status)?,
            expiration_date: self.expiration_date,
            delivered_date: self.delivered_date,
            refunded_date: self.refunded_date,
            returned_date: self.returned_date,
            history,
            weight: self.weight,
            worth: self.worth,
        })
    }
}

#[derive(sqlx::FromRow)]
struct OrderRecordRow {
    order_id: i64,
    timestamp: DateTime<Utc>,
    status: String,
    description: String,
}

fn parse_status(raw: &str) -> StoreResult<OrderStatus> {
    raw.parse::<OrderStatus>()
        .map_err(|e| StoreError::Decode(e.to_string()))
}

/// Load history for the given orders, keyed by order id, oldest first.
async fn load_history(
    conn: &mut PgConnection,
    order_ids: &[i64],
) -> StoreResult<HashMap<i64, Vec<OrderRecord>>> {
    let rows: Vec<OrderRecordRow> = sqlx::query_as(
        "SELECT order_id, timestamp, status, description
         FROM order_records
         WHERE order_id = ANY($1)
         ORDER BY order_id, timestamp, id",
    )
    .bind(order_ids)
    .fetch_all(&mut *conn)
    .await?;

    let mut history: HashMap<i64, Vec<OrderRecord>> = HashMap::new();
    for row in rows {
        let record = OrderRecord {
            timestamp: row.timestamp,
            status: parse_status(&row.status)?,
            description: row.description,
        };
        history.entry(row.order_id).or_default().push(record);
    }

    Ok(history)
}

async fn attach_history(conn: &mut PgConnection, rows: Vec<OrderRow>) -> StoreResult<Vec<Order>> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let ids: Vec<i64> = rows.iter().map(|row| row.id).collect();
    let mut history = load_history(conn, &ids).await?;

    rows.into_iter()
        .map(|row| {
            let records = history.remove(&row.id).unwrap_or_default();
            row.into_order(records)
        })
        .collect()
}

#[async_trait]
impl OrderStore for PgOrderStore {
    type Conn = PgConnection;

    async fn add(&self, scope: Scope<'_, PgConnection>, order: &Order) -> StoreResult<i64> {
        let mut conn = self.acquire(scope).await?;

        let id: i64 = sqlx::query_scalar(
            "INSERT INTO orders (
                recipient_id, expiration_date, delivered_date, refunded_date,
                returned_date, status, weight, worth
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id",
        )
        .bind(order.recipient_id)
        .bind(order.expiration_date)
        .bind(order.delivered_date)
        .bind(order.refunded_date)
        .bind(order.returned_date)
        .bind(order.status.as_str())
        .bind(order.weight)
        .bind(order.worth)
        .fetch_one(&mut *conn)
        .await?;

        tracing::debug!(order_id = id, "Inserted order row");

        Ok(id)
    }

    async fn add_history_record(
        &self,
        scope: Scope<'_, PgConnection>,
        record: &OrderRecord,
        order_id: i64,
    ) -> StoreResult<i64> {
        let mut conn = self.acquire(scope).await?;

        let id: i64 = sqlx::query_scalar(
            "INSERT INTO order_records (order_id, description, timestamp, status)
             VALUES ($1, $2, $3, $4)
             RETURNING id",
        )
        .bind(order_id)
        .bind(&record.description)
        .bind(record.timestamp)
        .bind(record.status.as_str())
        .fetch_one(&mut *conn)
        .await?;

        Ok(id)
    }

    async fn update(&self, scope: Scope<'_, PgConnection>, order: &Order) -> StoreResult<()> {
        let mut conn = self.acquire(scope).await?;

        let result = sqlx::query(
            "UPDATE orders SET
                recipient_id = $1, expiration_date = $2, delivered_date = $3,
                refunded_date = $4, returned_date = $5, status = $6,
                weight = $7, worth = $8
             WHERE id = $9",
        )
        .bind(order.recipient_id)
        .bind(order.expiration_date)
        .bind(order.delivered_date)
        .bind(order.refunded_date)
        .bind(order.returned_date)
        .bind(order.status.as_str())
        .bind(order.weight)
        .bind(order.worth)
        .bind(order.id)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(order.id));
        }

        Ok(())
    }

    async fn delete(&self, scope: Scope<'_, PgConnection>, order_id: i64) -> StoreResult<()> {
        let mut conn = self.acquire(scope).await?;

        sqlx::query("DELETE FROM order_records WHERE order_id = $1")
            .bind(order_id)
            .execute(&mut *conn)
            .await?;

        let result = sqlx::query("DELETE FROM orders WHERE id = $1")
            .bind(order_id)
            .execute(&mut *conn)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(order_id));
        }

        Ok(())
    }

    async fn get_by_id(&self, scope: Scope<'_, PgConnection>, order_id: i64) -> StoreResult<Order> {
        let mut conn = self.acquire(scope).await?;

        let row: Option<OrderRow> = sqlx::query_as(
            "SELECT id, recipient_id, expiration_date, delivered_date, refunded_date,
                    returned_date, status, weight, worth
             FROM orders
             WHERE id = $1",
        )
        .bind(order_id)
        .fetch_optional(&mut *conn)
        .await?;

        let row = row.ok_or(StoreError::NotFound(order_id))?;

        attach_history(&mut conn, vec![row])
            .await?
            .pop()
            .ok_or(StoreError::NotFound(order_id))
    }

    async fn get_by_ids(&self, scope: Scope<'_, PgConnection>, order_ids: &[i64]) -> StoreResult<Vec<Order>> {
        if order_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.acquire(scope).await?;

        let rows: Vec<OrderRow> = sqlx::query_as(
            "SELECT id, recipient_id, expiration_date, delivered_date, refunded_date,
                    returned_date, status, weight, worth
             FROM orders
             WHERE id = ANY($1)
             ORDER BY id ASC",
        )
        .bind(order_ids)
        .fetch_all(&mut *conn)
        .await?;

        attach_history(&mut conn, rows).await
    }

    async fn get_list(&self, scope: Scope<'_, PgConnection>, pagination: Pagination) -> StoreResult<Vec<Order>> {
        if pagination.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.acquire(scope).await?;

        let rows: Vec<OrderRow> = sqlx::query_as(
            "SELECT id, recipient_id, expiration_date, delivered_date, refunded_date,
                    returned_date, status, weight, worth
             FROM orders
             ORDER BY id ASC
             LIMIT $1
             OFFSET $2",
        )
        .bind(i64::from(pagination.limit))
        .bind(i64::from(pagination.offset))
        .fetch_all(&mut *conn)
        .await?;

        attach_history(&mut conn, rows).await
    }

    async fn get_all(&self, scope: Scope<'_, PgConnection>) -> StoreResult<Vec<Order>> {
        let mut conn = self.acquire(scope).await?;

        let rows: Vec<OrderRow> = sqlx::query_as(
            "SELECT id, recipient_id, expiration_date, delivered_date, refunded_date,
                    returned_date, status, weight, worth
             FROM orders
             ORDER BY id ASC",
        )
        .fetch_all(&mut *conn)
        .await?;

        attach_history(&mut conn, rows).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(status: &str) -> OrderRow {
        OrderRow {
            id: 3,
            recipient_id: 9,
            expiration_date: Utc::now(),
            delivered_date: None,
            refunded_date: None,
            returned_date: None,
            status: status.to_string(),
            weight: 2.0,
            worth: 50.0,
        }
    }

    #[test]
    fn test_row_into_order_keeps_history() {
        let history = vec![OrderRecord::new(OrderStatus::Received, Utc::now())];

        let order = row("received").into_order(history.clone()).unwrap();

        assert_eq!(order.id, 3);
        assert_eq!(order.status, OrderStatus::Received);
        assert_eq!(order.history, history);
    }

    #[test]
    fn test_row_with_unknown_status_fails_to_decode() {
        let result = row("returned").into_order(Vec::new());
        assert!(matches!(result, Err(StoreError::Decode(_))));
    }

    // Queries against a live PostgreSQL instance are exercised by the binary:
    // - add / add_history_record returning server-assigned ids
    // - update and delete reporting NotFound on zero affected rows
    // - get_list pagination with history joined per order
}
