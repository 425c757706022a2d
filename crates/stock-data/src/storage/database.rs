//! PostgreSQL 연결 풀.

use serde::Serialize;
use sqlx::postgres::{PgPool, PgPoolOptions};
use stock_core::DatabaseConfig;
use tracing::info;

use crate::error::{DataError, Result};

/// 연결 풀 통계.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    /// 현재 열린 연결 수
    pub total_connections: u32,
    /// 유휴 연결 수
    pub idle_connections: usize,
    /// 사용 중인 연결 수
    pub acquired_connections: u32,
    /// 최대 연결 수
    pub max_connections: u32,
}

/// 데이터베이스 연결 풀 래퍼.
#[derive(Debug, Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// 설정에 따라 연결 풀을 생성합니다.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "데이터베이스 연결 중"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout())
            .idle_timeout(config.idle_timeout())
            .max_lifetime(config.max_lifetime())
            .connect(&config.url)
            .await
            .map_err(|e| DataError::ConnectionError(e.to_string()))?;

        info!("데이터베이스 연결 완료");

        Ok(Self { pool })
    }

    /// 기존 연결 풀을 재사용합니다.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 내부 연결 풀.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// `migrations/`의 스키마 마이그레이션을 실행합니다.
    pub async fn migrate(&self) -> Result<()> {
        info!("마이그레이션 실행 중");

        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| DataError::MigrationError(e.to_string()))?;

        info!("마이그레이션 완료");
        Ok(())
    }

    /// 연결 상태 확인.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| DataError::ConnectionError(e.to_string()))?;
        Ok(())
    }

    /// 연결 풀 통계.
    pub fn pool_stats(&self) -> PoolStats {
        let total = self.pool.size();
        let idle = self.pool.num_idle();
        PoolStats {
            total_connections: total,
            idle_connections: idle,
            acquired_connections: total.saturating_sub(idle as u32),
            max_connections: self.pool.options().get_max_connections(),
        }
    }

    /// 연결 풀을 닫습니다.
    pub async fn close(&self) {
        info!("데이터베이스 연결 풀 종료");
        self.pool.close().await;
    }
}
