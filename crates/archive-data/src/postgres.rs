//! Postgres 카탈로그 구현.
//!
//! 버킷 스키마 규칙: 주식은 단일 `Data_STK` 스키마, 옵션은 만기 월별
//! `Data_OPT_<MonYY>` 스키마를 사용합니다. 테이블/스키마 이름은 전부
//! 종목 식별 정보에서 파생되며 외부 입력이 직접 들어가지 않습니다.
//!
//! 모든 연산은 풀에서 연결을 빌려 호출 범위 안에서만 사용합니다.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::prelude::ToPrimitive;
use sqlx::{PgPool, QueryBuilder, Row};

use archive_core::{Identity, SecurityKind};

use crate::catalog::{BarRow, Catalog, ExpiredTable};
use crate::error::{DataError, Result};

/// sqlx/Postgres 기반 카탈로그.
#[derive(Debug, Clone)]
pub struct PgCatalog {
    pool: PgPool,
}

impl PgCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 체크포인트 테이블 보장 (없으면 생성)
    async fn ensure_checkpoint_table(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS archive_checkpoint (
                workflow_name TEXT PRIMARY KEY,
                last_run_at TIMESTAMP NOT NULL,
                updated_at TIMESTAMP NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// 식별 정보에서 (스키마, 테이블) 이름 쌍 파생
    fn qualified_name(instrument: &Identity) -> Result<(String, String)> {
        let schema = instrument.database_name()?;
        let table = instrument.table_name()?;
        Ok((schema, table))
    }
}

#[async_trait]
impl Catalog for PgCatalog {
    async fn ensure_table(&self, instrument: &Identity) -> Result<()> {
        let (schema, table) = Self::qualified_name(instrument)?;

        sqlx::query(&format!(r#"CREATE SCHEMA IF NOT EXISTS "{schema}""#))
            .execute(&self.pool)
            .await?;

        let ddl = match instrument.kind {
            SecurityKind::Stock => format!(
                r#"
                CREATE TABLE IF NOT EXISTS "{schema}"."{table}" (
                    date TIMESTAMP,
                    h DOUBLE PRECISION,
                    l DOUBLE PRECISION,
                    o DOUBLE PRECISION,
                    c DOUBLE PRECISION
                )
                "#
            ),
            SecurityKind::Option => format!(
                r#"
                CREATE TABLE IF NOT EXISTS "{schema}"."{table}" (
                    date TIMESTAMP,
                    identifier VARCHAR(50),
                    callput VARCHAR(1),
                    strike DOUBLE PRECISION,
                    h DOUBLE PRECISION,
                    l DOUBLE PRECISION,
                    o DOUBLE PRECISION,
                    c DOUBLE PRECISION
                )
                "#
            ),
        };
        sqlx::query(&ddl).execute(&self.pool).await?;
        Ok(())
    }

    async fn table_exists(&self, instrument: &Identity) -> Result<bool> {
        let (schema, table) = Self::qualified_name(instrument)?;
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = $1 AND table_name = $2
            )
            "#,
        )
        .bind(&schema)
        .bind(&table)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn last_update(&self, instrument: &Identity) -> Result<Option<NaiveDateTime>> {
        let (schema, table) = Self::qualified_name(instrument)?;

        let last: Option<NaiveDateTime> = match instrument.kind {
            SecurityKind::Stock => {
                sqlx::query_scalar(&format!(
                    r#"SELECT MAX(date) FROM "{schema}"."{table}""#
                ))
                .fetch_one(&self.pool)
                .await?
            }
            SecurityKind::Option => {
                let terms = instrument.option_terms().map_err(DataError::Instrument)?;
                sqlx::query_scalar(&format!(
                    r#"
                    SELECT MAX(date) FROM "{schema}"."{table}"
                    WHERE strike = $1 AND callput = $2
                    "#
                ))
                .bind(terms.strike.to_f64().unwrap_or(f64::NAN))
                .bind(terms.right.as_str())
                .fetch_one(&self.pool)
                .await?
            }
        };
        Ok(last)
    }

    async fn existing_timestamps(&self, instrument: &Identity) -> Result<HashSet<NaiveDateTime>> {
        let (schema, table) = Self::qualified_name(instrument)?;

        let stamps: Vec<NaiveDateTime> = match instrument.kind {
            SecurityKind::Stock => {
                sqlx::query_scalar(&format!(
                    r#"SELECT DISTINCT date FROM "{schema}"."{table}""#
                ))
                .fetch_all(&self.pool)
                .await?
            }
            SecurityKind::Option => {
                let terms = instrument.option_terms().map_err(DataError::Instrument)?;
                sqlx::query_scalar(&format!(
                    r#"
                    SELECT DISTINCT date FROM "{schema}"."{table}"
                    WHERE strike = $1 AND callput = $2
                    "#
                ))
                .bind(terms.strike.to_f64().unwrap_or(f64::NAN))
                .bind(terms.right.as_str())
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(stamps.into_iter().collect())
    }

    async fn write_batch(&self, instrument: &Identity, rows: &[BarRow]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let (schema, table) = Self::qualified_name(instrument)?;

        let mut builder: QueryBuilder<sqlx::Postgres> = match instrument.kind {
            SecurityKind::Stock => {
                let mut builder = QueryBuilder::new(format!(
                    r#"INSERT INTO "{schema}"."{table}" (date, h, l, o, c) "#
                ));
                builder.push_values(rows, |mut b, row| {
                    b.push_bind(row.stamp)
                        .push_bind(row.ohlc.high)
                        .push_bind(row.ohlc.low)
                        .push_bind(row.ohlc.open)
                        .push_bind(row.ohlc.close);
                });
                builder
            }
            SecurityKind::Option => {
                let terms = instrument.option_terms().map_err(DataError::Instrument)?;
                let identifier = instrument
                    .option_identifier()
                    .map_err(DataError::Instrument)?;
                let strike: f64 = terms.strike.to_f64().unwrap_or(f64::NAN);
                let right = terms.right.as_str();

                let mut builder = QueryBuilder::new(format!(
                    r#"INSERT INTO "{schema}"."{table}" (date, identifier, callput, strike, h, l, o, c) "#
                ));
                builder.push_values(rows, |mut b, row| {
                    b.push_bind(row.stamp)
                        .push_bind(identifier.clone())
                        .push_bind(right)
                        .push_bind(strike)
                        .push_bind(row.ohlc.high)
                        .push_bind(row.ohlc.low)
                        .push_bind(row.ohlc.open)
                        .push_bind(row.ohlc.close);
                });
                builder
            }
        };

        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn list_expired_option_tables(&self, expiries: &[NaiveDate]) -> Result<Vec<ExpiredTable>> {
        if expiries.is_empty() {
            return Ok(Vec::new());
        }

        // 만기일이 속한 월 버킷 스키마만 조회
        let schemas: Vec<String> = {
            let mut out: Vec<String> = expiries
                .iter()
                .map(|d| format!("Data_OPT_{}", d.format("%b%y")))
                .collect();
            out.sort();
            out.dedup();
            out
        };

        let rows = sqlx::query(
            r#"
            SELECT table_schema, table_name
            FROM information_schema.tables
            WHERE table_schema = ANY($1)
            "#,
        )
        .bind(&schemas)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::new();
        for row in rows {
            let table: String = row.try_get("table_name")?;
            match parse_option_table_name(&table) {
                Ok(parsed) if expiries.contains(&parsed.expiry) => out.push(parsed),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(table, error = %e, "옵션 테이블 이름 파싱 실패, 건너뜀");
                }
            }
        }
        Ok(out)
    }

    async fn load_checkpoint(&self, workflow: &str) -> Result<Option<NaiveDateTime>> {
        self.ensure_checkpoint_table().await?;
        let last: Option<NaiveDateTime> = sqlx::query_scalar(
            r#"
            SELECT last_run_at FROM archive_checkpoint
            WHERE workflow_name = $1
            "#,
        )
        .bind(workflow)
        .fetch_optional(&self.pool)
        .await?;
        Ok(last)
    }

    async fn save_checkpoint(&self, workflow: &str, at: NaiveDateTime) -> Result<()> {
        self.ensure_checkpoint_table().await?;
        sqlx::query(
            r#"
            INSERT INTO archive_checkpoint (workflow_name, last_run_at, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (workflow_name)
            DO UPDATE SET
                last_run_at = EXCLUDED.last_run_at,
                updated_at = NOW()
            "#,
        )
        .bind(workflow)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// `<Symbol>_OPT_<DDMonYY>` 형식의 테이블 이름 파싱.
pub(crate) fn parse_option_table_name(table: &str) -> Result<ExpiredTable> {
    let parts: Vec<&str> = table.split('_').collect();
    if parts.len() != 3 || parts[1] != "OPT" {
        return Err(DataError::InvalidTableName(table.to_string()));
    }
    let expiry = NaiveDate::parse_from_str(parts[2], "%d%b%y")
        .map_err(|_| DataError::InvalidTableName(table.to_string()))?;
    Ok(ExpiredTable {
        symbol: parts[0].to_string(),
        expiry,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_option_table_name() {
        let parsed = parse_option_table_name("SPY_OPT_19Sep25").unwrap();
        assert_eq!(parsed.symbol, "SPY");
        assert_eq!(parsed.expiry, NaiveDate::from_ymd_opt(2025, 9, 19).unwrap());
    }

    #[test]
    fn test_parse_rejects_stock_tables() {
        assert!(parse_option_table_name("SPY_STK").is_err());
        assert!(parse_option_table_name("SPY_OPT_notadate").is_err());
    }
}
