//! 시뮬레이션 업스트림 소스.
//!
//! 실제 전송 계층 없이 파이프라인 전체를 구동하기 위한
//! `MarketDataSource` 구현입니다. 요청마다 결정적인 체인/캔들을
//! 생성해 상관관계 레지스트리로 비동기 디스패치합니다.
//! `--simulate` 실행과 통합 테스트에서 사용합니다.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Datelike, Duration, NaiveDateTime, Weekday};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;

use archive_core::{
    BarRequestOptions, CoreError, FetchSpan, Identity, MarketDataSource, Ohlc, Reply,
    RequestRegistry, Result,
};

/// 시뮬레이션 기준 가격 (심볼 해시로 변주)
const BASE_PRICE: f64 = 100.0;

/// 결정적 응답을 생성하는 시뮬레이션 소스.
pub struct SimSource {
    registry: Arc<RequestRegistry>,
    connected: AtomicBool,
    /// 생성할 만기 수 (주간)
    pub chain_expiries: usize,
    /// 행사가 간격 수 (기준가 ± n*5)
    pub chain_strike_steps: i64,
}

impl SimSource {
    pub fn new(registry: Arc<RequestRegistry>) -> Self {
        Self {
            registry,
            connected: AtomicBool::new(true),
            chain_expiries: 2,
            chain_strike_steps: 2,
        }
    }

    /// 연결 상태 강제 설정 (재접속 경로 테스트용)
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    fn symbol_seed(symbol: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        symbol.hash(&mut hasher);
        hasher.finish()
    }
}

#[async_trait]
impl MarketDataSource for SimSource {
    async fn request_instrument_id(&self, request_id: i64, instrument: &Identity) -> Result<()> {
        // "NODATA" 심볼은 데이터 없음 에러 경로를 재현한다
        if instrument.symbol == "NODATA" {
            let registry = Arc::clone(&self.registry);
            tokio::spawn(async move {
                if let Err(e) = registry
                    .dispatch_error(request_id, 200, "No security definition has been found")
                    .await
                {
                    tracing::warn!(request_id, error = %e, "시뮬레이션 에러 디스패치 실패");
                }
            });
            return Ok(());
        }

        let con_id = (Self::symbol_seed(&instrument.symbol) % 1_000_000) as i64 + 1;
        let registry = Arc::clone(&self.registry);
        tokio::spawn(async move {
            if let Err(e) = registry.dispatch(request_id, Reply::InstrumentId(con_id)).await {
                tracing::warn!(request_id, error = %e, "시뮬레이션 응답 디스패치 실패");
            }
        });
        Ok(())
    }

    async fn request_option_chain(
        &self,
        request_id: i64,
        symbol: &str,
        _con_id: i64,
    ) -> Result<()> {
        let seed = Self::symbol_seed(symbol);
        let today = chrono::Local::now().date_naive();

        // 다음 금요일부터 주간 만기
        let mut expiries = Vec::new();
        let mut day = today + Duration::days(1);
        while expiries.len() < self.chain_expiries {
            if day.weekday() == Weekday::Fri {
                expiries.push(day);
            }
            day += Duration::days(1);
        }

        let base = Decimal::from((seed % 100) as i64 + 50);
        let strikes: Vec<Decimal> = (-self.chain_strike_steps..=self.chain_strike_steps)
            .map(|step| base + Decimal::from(step * 5))
            .collect();

        let registry = Arc::clone(&self.registry);
        tokio::spawn(async move {
            if let Err(e) = registry
                .dispatch(request_id, Reply::OptionChain { expiries, strikes })
                .await
            {
                tracing::warn!(request_id, error = %e, "시뮬레이션 체인 디스패치 실패");
            }
        });
        Ok(())
    }

    async fn request_historical_bars(
        &self,
        request_id: i64,
        instrument: &Identity,
        end: NaiveDateTime,
        span: FetchSpan,
        _options: &BarRequestOptions,
    ) -> Result<()> {
        if !self.is_connected() {
            return Err(CoreError::Upstream("not connected".to_string()));
        }

        // 요청 기간에 비례한 일봉 생성 (세션 종료 시각 고정)
        let days = (span.weeks() * 7).min(1100);
        let seed = Self::symbol_seed(&instrument.symbol) ^ request_id as u64;
        let registry = Arc::clone(&self.registry);

        tokio::spawn(async move {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut price = BASE_PRICE + (seed % 50) as f64;

            for offset in (0..days).rev() {
                let date = end.date() - Duration::days(offset);
                if matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
                    continue;
                }
                let drift: f64 = rng.gen_range(-1.0..1.0);
                let open = price;
                let close = (price + drift).max(0.01);
                let high = open.max(close) + rng.gen_range(0.0..0.5);
                let low = (open.min(close) - rng.gen_range(0.0..0.5)).max(0.01);
                price = close;

                let stamp = date
                    .and_hms_opt(15, 30, 0)
                    .unwrap_or_else(|| date.and_time(chrono::NaiveTime::MIN));
                let reply = Reply::Bar {
                    stamp,
                    ohlc: Ohlc {
                        open,
                        high,
                        low,
                        close,
                    },
                };
                if let Err(e) = registry.dispatch(request_id, reply).await {
                    tracing::warn!(request_id, error = %e, "시뮬레이션 캔들 디스패치 실패");
                    return;
                }
            }

            if let Err(e) = registry.dispatch(request_id, Reply::HistoryComplete).await {
                tracing::warn!(request_id, error = %e, "시뮬레이션 종결 디스패치 실패");
            }
        });
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn connect(&self) -> Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use archive_core::{Continuation, InstrumentArena};

    #[tokio::test]
    async fn test_instrument_id_reply_is_dispatched() {
        let arena = Arc::new(InstrumentArena::new());
        let (handle, ins) = arena.insert(Identity::stock("SPY")).await;
        let registry = Arc::new(RequestRegistry::new(Arc::clone(&arena)));
        let source = SimSource::new(Arc::clone(&registry));

        registry.register(1, Continuation::InstrumentId(handle)).await;
        source.request_instrument_id(1, &ins.identity).await.unwrap();

        // 비동기 디스패치 대기
        for _ in 0..50 {
            if ins.con_id().await.is_some() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(ins.con_id().await.is_some());
    }

    #[tokio::test]
    async fn test_nodata_symbol_sets_error_marker() {
        let arena = Arc::new(InstrumentArena::new());
        let (handle, ins) = arena.insert(Identity::stock("NODATA")).await;
        let registry = Arc::new(RequestRegistry::new(Arc::clone(&arena)));
        let source = SimSource::new(Arc::clone(&registry));

        registry.register(1, Continuation::InstrumentId(handle)).await;
        source.request_instrument_id(1, &ins.identity).await.unwrap();

        for _ in 0..50 {
            if ins.has_error().await {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(ins.has_error().await);
    }
}
