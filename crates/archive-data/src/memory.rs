//! 인메모리 카탈로그.
//!
//! 통합 테스트와 `--dry-run` 실행에서 Postgres 대신 사용하는 저장소
//! 대역입니다. 실제 저장소처럼 행을 그대로 누적하며, 중복 제거는
//! 영속화 스테이지의 책임으로 남겨 둡니다.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use tokio::sync::Mutex;

use archive_core::{Identity, SecurityKind};

use crate::catalog::{BarRow, Catalog, ExpiredTable};
use crate::error::Result;
use crate::postgres::parse_option_table_name;

#[derive(Debug, Clone)]
struct MemoryRow {
    stamp: NaiveDateTime,
    strike: Option<Decimal>,
    right: Option<String>,
}

#[derive(Debug, Default)]
struct Inner {
    /// (스키마, 테이블) → 저장된 행. 키 존재 = 테이블 존재.
    tables: HashMap<(String, String), Vec<MemoryRow>>,
    checkpoints: HashMap<String, NaiveDateTime>,
}

/// 인메모리 카탈로그 구현.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    inner: Mutex<Inner>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    fn qualified_name(instrument: &Identity) -> Result<(String, String)> {
        Ok((instrument.database_name()?, instrument.table_name()?))
    }

    fn row_matches(instrument: &Identity, row: &MemoryRow) -> bool {
        match instrument.kind {
            SecurityKind::Stock => true,
            SecurityKind::Option => match instrument.option_terms() {
                Ok(terms) => {
                    row.strike == Some(terms.strike)
                        && row.right.as_deref() == Some(terms.right.as_str())
                }
                Err(_) => false,
            },
        }
    }

    /// 저장된 행 수 (테스트 검증용)
    pub async fn row_count(&self, instrument: &Identity) -> Result<usize> {
        let key = Self::qualified_name(instrument)?;
        let inner = self.inner.lock().await;
        Ok(inner
            .tables
            .get(&key)
            .map(|rows| {
                rows.iter()
                    .filter(|r| Self::row_matches(instrument, r))
                    .count()
            })
            .unwrap_or(0))
    }

    /// 테이블을 미리 만들어 둠 (테스트 픽스처용)
    pub async fn seed_table(&self, instrument: &Identity) -> Result<()> {
        self.ensure_table(instrument).await
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn ensure_table(&self, instrument: &Identity) -> Result<()> {
        let key = Self::qualified_name(instrument)?;
        self.inner.lock().await.tables.entry(key).or_default();
        Ok(())
    }

    async fn table_exists(&self, instrument: &Identity) -> Result<bool> {
        let key = Self::qualified_name(instrument)?;
        Ok(self.inner.lock().await.tables.contains_key(&key))
    }

    async fn last_update(&self, instrument: &Identity) -> Result<Option<NaiveDateTime>> {
        let key = Self::qualified_name(instrument)?;
        let inner = self.inner.lock().await;
        Ok(inner.tables.get(&key).and_then(|rows| {
            rows.iter()
                .filter(|r| Self::row_matches(instrument, r))
                .map(|r| r.stamp)
                .max()
        }))
    }

    async fn existing_timestamps(&self, instrument: &Identity) -> Result<HashSet<NaiveDateTime>> {
        let key = Self::qualified_name(instrument)?;
        let inner = self.inner.lock().await;
        Ok(inner
            .tables
            .get(&key)
            .map(|rows| {
                rows.iter()
                    .filter(|r| Self::row_matches(instrument, r))
                    .map(|r| r.stamp)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn write_batch(&self, instrument: &Identity, rows: &[BarRow]) -> Result<u64> {
        let key = Self::qualified_name(instrument)?;
        let (strike, right) = match instrument.kind {
            SecurityKind::Stock => (None, None),
            SecurityKind::Option => {
                let terms = instrument.option_terms()?;
                (Some(terms.strike), Some(terms.right.as_str().to_string()))
            }
        };

        let mut inner = self.inner.lock().await;
        let table = inner.tables.entry(key).or_default();
        for row in rows {
            table.push(MemoryRow {
                stamp: row.stamp,
                strike,
                right: right.clone(),
            });
        }
        Ok(rows.len() as u64)
    }

    async fn list_expired_option_tables(&self, expiries: &[NaiveDate]) -> Result<Vec<ExpiredTable>> {
        let inner = self.inner.lock().await;
        let mut out = Vec::new();
        for (schema, table) in inner.tables.keys() {
            if !schema.starts_with("Data_OPT_") {
                continue;
            }
            if let Ok(parsed) = parse_option_table_name(table) {
                if expiries.contains(&parsed.expiry) {
                    out.push(parsed);
                }
            }
        }
        Ok(out)
    }

    async fn load_checkpoint(&self, workflow: &str) -> Result<Option<NaiveDateTime>> {
        Ok(self.inner.lock().await.checkpoints.get(workflow).copied())
    }

    async fn save_checkpoint(&self, workflow: &str, at: NaiveDateTime) -> Result<()> {
        self.inner
            .lock()
            .await
            .checkpoints
            .insert(workflow.to_string(), at);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use archive_core::{Ohlc, OptionRight};
    use rust_decimal_macros::dec;

    fn stamp(h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 8, 1)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    fn bar(h: u32) -> BarRow {
        BarRow {
            stamp: stamp(h),
            ohlc: Ohlc {
                open: 1.0,
                high: 2.0,
                low: 0.5,
                close: 1.5,
            },
        }
    }

    #[tokio::test]
    async fn test_option_rows_filter_by_strike_and_right() {
        let catalog = MemoryCatalog::new();
        let expiry = NaiveDate::from_ymd_opt(2025, 9, 19).unwrap();
        let call = Identity::option("SPY", dec!(450), OptionRight::Call, expiry);
        let put = Identity::option("SPY", dec!(450), OptionRight::Put, expiry);

        catalog.write_batch(&call, &[bar(15), bar(16)]).await.unwrap();
        catalog.write_batch(&put, &[bar(15)]).await.unwrap();

        // 같은 테이블을 공유하지만 조회는 계약별로 분리된다
        assert_eq!(catalog.last_update(&call).await.unwrap(), Some(stamp(16)));
        assert_eq!(catalog.last_update(&put).await.unwrap(), Some(stamp(15)));
        assert_eq!(catalog.existing_timestamps(&call).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_expired_table_listing() {
        let catalog = MemoryCatalog::new();
        let expiry = NaiveDate::from_ymd_opt(2025, 8, 28).unwrap();
        let other = NaiveDate::from_ymd_opt(2025, 9, 19).unwrap();
        let opt = Identity::option("QQQ", dec!(400), OptionRight::Call, expiry);
        let live = Identity::option("QQQ", dec!(400), OptionRight::Call, other);

        catalog.seed_table(&opt).await.unwrap();
        catalog.seed_table(&live).await.unwrap();

        let listed = catalog.list_expired_option_tables(&[expiry]).await.unwrap();
        assert_eq!(
            listed,
            vec![ExpiredTable {
                symbol: "QQQ".to_string(),
                expiry
            }]
        );
    }
}
