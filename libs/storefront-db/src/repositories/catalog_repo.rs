use anyhow::{Context, Result};
use rust_decimal::Decimal;
use sqlx::PgConnection;

use crate::models::catalog::{Plan, Server};

pub struct CatalogRepository;

impl CatalogRepository {
    pub async fn get_plan(conn: &mut PgConnection, id: i64) -> Result<Option<Plan>> {
        sqlx::query_as::<_, Plan>("SELECT * FROM plans WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
            .context("Failed to fetch plan")
    }

    pub async fn get_server(conn: &mut PgConnection, id: i64) -> Result<Option<Server>> {
        sqlx::query_as::<_, Server>("SELECT * FROM servers WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
            .context("Failed to fetch server")
    }

    pub async fn create_plan(
        conn: &mut PgConnection,
        title: &str,
        price: Decimal,
        duration_days: Option<i32>,
        traffic_gb: Option<i32>,
    ) -> Result<Plan> {
        sqlx::query_as::<_, Plan>(
            "INSERT INTO plans (title, price, duration_days, traffic_gb) VALUES ($1, $2, $3, $4) RETURNING *",
        )
        .bind(title)
        .bind(price)
        .bind(duration_days)
        .bind(traffic_gb)
        .fetch_one(&mut *conn)
        .await
        .context("Failed to create plan")
    }

    pub async fn create_server(conn: &mut PgConnection, name: &str, host: &str) -> Result<Server> {
        sqlx::query_as::<_, Server>(
            "INSERT INTO servers (name, host) VALUES ($1, $2) RETURNING *",
        )
        .bind(name)
        .bind(host)
        .fetch_one(&mut *conn)
        .await
        .context("Failed to create server")
    }
}
