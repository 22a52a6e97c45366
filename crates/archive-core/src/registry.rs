//! 요청 상관관계 레지스트리.
//!
//! 비동기 업스트림 API에 보낸 요청 ID를, 응답 도착 시 실행할 타입화된
//! continuation에 매핑합니다. 느린 발굴 응답과 빠른 히스토리 응답이
//! 충돌하지 않도록 두 개의 독립적인 ID 범위를 사용합니다:
//! 발굴(1부터), 히스토리(100_000_000부터). ID는 단조 증가하며 재사용하지
//! 않습니다.
//!
//! 단발성 요청(계약 ID 조회, 히스토리 종결)은 디스패치와 함께 핸들러가
//! 제거되고, 다발성 응답(체인 행, 캔들)은 핸들러를 유지합니다.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use tokio::sync::Mutex;

use crate::arena::{InstrumentArena, InstrumentHandle};
use crate::error::{CoreError, Result};
use crate::instrument::Ohlc;

/// 히스토리 요청 ID 범위의 시작값.
pub const FETCH_ID_BASE: i64 = 100_000_000;

/// "해당 종목 데이터 없음"을 뜻하는 업스트림 에러 코드.
const NO_DATA_ERROR_CODES: [i32; 2] = [162, 200];

/// 요청 ID 발급기. 범위별 단조 증가 카운터.
#[derive(Debug)]
pub struct RequestIds {
    discovery: AtomicI64,
    fetch: AtomicI64,
}

impl Default for RequestIds {
    fn default() -> Self {
        Self {
            discovery: AtomicI64::new(1),
            fetch: AtomicI64::new(FETCH_ID_BASE),
        }
    }
}

impl RequestIds {
    pub fn new() -> Self {
        Self::default()
    }

    /// 다음 발굴 요청 ID (계약 ID / 체인 조회)
    pub fn next_discovery(&self) -> i64 {
        self.discovery.fetch_add(1, Ordering::Relaxed)
    }

    /// 다음 히스토리 요청 ID
    pub fn next_fetch(&self) -> i64 {
        self.fetch.fetch_add(1, Ordering::Relaxed)
    }
}

/// 응답 도착 시 실행할 continuation 종류.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuation {
    /// 계약 ID 응답을 핸들의 종목에 기록 (단발성)
    InstrumentId(InstrumentHandle),
    /// 체인 행을 핸들의 주식에 병합 (다발성, 명시적 retire 필요)
    ChainResolved(InstrumentHandle),
    /// 캔들/종결 응답을 핸들의 종목에 기록 (종결 시 제거)
    BarsReceived(InstrumentHandle),
}

impl Continuation {
    fn handle(&self) -> InstrumentHandle {
        match self {
            Self::InstrumentId(h) | Self::ChainResolved(h) | Self::BarsReceived(h) => *h,
        }
    }
}

/// 업스트림 응답 페이로드.
#[derive(Debug, Clone)]
pub enum Reply {
    /// 계약 ID 조회 결과
    InstrumentId(i64),
    /// 옵션 체인 행 (만기 / 행사가 목록)
    OptionChain {
        expiries: Vec<NaiveDate>,
        strikes: Vec<Decimal>,
    },
    /// 히스토리 캔들 한 건
    Bar { stamp: NaiveDateTime, ohlc: Ohlc },
    /// 히스토리 수신 종결
    HistoryComplete,
}

/// 요청 ID → continuation 레지스트리.
#[derive(Debug)]
pub struct RequestRegistry {
    arena: Arc<InstrumentArena>,
    handlers: Mutex<HashMap<i64, Continuation>>,
}

impl RequestRegistry {
    pub fn new(arena: Arc<InstrumentArena>) -> Self {
        Self {
            arena,
            handlers: Mutex::new(HashMap::new()),
        }
    }

    /// continuation 등록
    pub async fn register(&self, request_id: i64, continuation: Continuation) {
        self.handlers.lock().await.insert(request_id, continuation);
    }

    /// 등록된 핸들러 수 (계측용)
    pub async fn pending(&self) -> usize {
        self.handlers.lock().await.len()
    }

    /// 바운디드 대기가 끝난 다발성 핸들러 제거 (체인 조회 등)
    pub async fn retire(&self, request_id: i64) {
        self.handlers.lock().await.remove(&request_id);
    }

    /// 응답 디스패치.
    ///
    /// 등록되지 않았거나 이미 소비된 ID는 `UnknownRequest`,
    /// continuation 종류와 맞지 않는 페이로드는 `ReplyMismatch`.
    pub async fn dispatch(&self, request_id: i64, reply: Reply) -> Result<()> {
        let continuation = {
            let handlers = self.handlers.lock().await;
            handlers
                .get(&request_id)
                .copied()
                .ok_or(CoreError::UnknownRequest(request_id))?
        };

        let instrument = self
            .arena
            .get(continuation.handle())
            .await
            .ok_or(CoreError::InvalidHandle(continuation.handle().index()))?;

        let consumed = match (continuation, reply) {
            (Continuation::InstrumentId(_), Reply::InstrumentId(con_id)) => {
                instrument.set_con_id(con_id).await;
                true
            }
            (Continuation::ChainResolved(_), Reply::OptionChain { expiries, strikes }) => {
                instrument.merge_chain(&expiries, &strikes).await;
                false
            }
            (Continuation::BarsReceived(_), Reply::Bar { stamp, ohlc }) => {
                instrument.push_bar(stamp, ohlc).await;
                false
            }
            (Continuation::BarsReceived(_), Reply::HistoryComplete) => {
                instrument.mark_history_complete().await;
                true
            }
            _ => return Err(CoreError::ReplyMismatch(request_id)),
        };

        if consumed {
            self.handlers.lock().await.remove(&request_id);
        }
        Ok(())
    }

    /// 업스트림 에러 신호 디스패치.
    ///
    /// 코드 162/200("데이터 없음")은 해당 종목의 에러 마커를 설정해
    /// 대기자를 해제하고 핸들러를 제거합니다. 그 외 코드는 기록만 합니다.
    pub async fn dispatch_error(&self, request_id: i64, code: i32, message: &str) -> Result<()> {
        if !NO_DATA_ERROR_CODES.contains(&code) {
            tracing::debug!(request_id, code, message, "무시된 업스트림 에러");
            return Ok(());
        }

        let continuation = {
            let mut handlers = self.handlers.lock().await;
            handlers
                .remove(&request_id)
                .ok_or(CoreError::UnknownRequest(request_id))?
        };

        let instrument = self
            .arena
            .get(continuation.handle())
            .await
            .ok_or(CoreError::InvalidHandle(continuation.handle().index()))?;

        tracing::debug!(
            request_id,
            code,
            instrument = %instrument.identity,
            "업스트림 '데이터 없음' 에러, 에러 마커 설정"
        );
        instrument.mark_error().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::Identity;

    async fn registry_with_stock() -> (Arc<InstrumentArena>, RequestRegistry, InstrumentHandle) {
        let arena = Arc::new(InstrumentArena::new());
        let (handle, _) = arena.insert(Identity::stock("AAPL")).await;
        let registry = RequestRegistry::new(Arc::clone(&arena));
        (arena, registry, handle)
    }

    #[test]
    fn test_id_ranges_are_disjoint_and_monotonic() {
        let ids = RequestIds::new();
        assert_eq!(ids.next_discovery(), 1);
        assert_eq!(ids.next_discovery(), 2);
        assert_eq!(ids.next_fetch(), FETCH_ID_BASE);
        assert_eq!(ids.next_fetch(), FETCH_ID_BASE + 1);
    }

    #[tokio::test]
    async fn test_unknown_request_is_rejected() {
        let (_arena, registry, _handle) = registry_with_stock().await;
        let err = registry.dispatch(42, Reply::InstrumentId(7)).await;
        assert!(matches!(err, Err(CoreError::UnknownRequest(42))));
    }

    #[tokio::test]
    async fn test_con_id_dispatch_is_one_shot() {
        let (arena, registry, handle) = registry_with_stock().await;
        registry.register(1, Continuation::InstrumentId(handle)).await;

        registry.dispatch(1, Reply::InstrumentId(265598)).await.unwrap();
        let ins = arena.get(handle).await.unwrap();
        assert_eq!(ins.con_id().await, Some(265598));

        // 같은 ID로 두 번째 응답이 오면 거부된다
        let err = registry.dispatch(1, Reply::InstrumentId(265598)).await;
        assert!(matches!(err, Err(CoreError::UnknownRequest(1))));
    }

    #[tokio::test]
    async fn test_bars_keep_handler_until_history_complete() {
        let (arena, registry, handle) = registry_with_stock().await;
        registry
            .register(FETCH_ID_BASE, Continuation::BarsReceived(handle))
            .await;

        let stamp = NaiveDate::from_ymd_opt(2025, 8, 1)
            .unwrap()
            .and_hms_opt(15, 30, 0)
            .unwrap();
        let ohlc = Ohlc {
            open: 1.0,
            high: 2.0,
            low: 0.5,
            close: 1.5,
        };

        registry
            .dispatch(FETCH_ID_BASE, Reply::Bar { stamp, ohlc })
            .await
            .unwrap();
        registry
            .dispatch(FETCH_ID_BASE, Reply::HistoryComplete)
            .await
            .unwrap();

        let ins = arena.get(handle).await.unwrap();
        assert!(ins.history_complete().await);
        assert_eq!(ins.bars_snapshot().await.len(), 1);
        assert_eq!(registry.pending().await, 0);
    }

    #[tokio::test]
    async fn test_mismatched_reply_is_rejected() {
        let (_arena, registry, handle) = registry_with_stock().await;
        registry.register(5, Continuation::InstrumentId(handle)).await;

        let err = registry.dispatch(5, Reply::HistoryComplete).await;
        assert!(matches!(err, Err(CoreError::ReplyMismatch(5))));
    }

    #[tokio::test]
    async fn test_no_data_error_sets_error_marker() {
        let (arena, registry, handle) = registry_with_stock().await;
        registry
            .register(FETCH_ID_BASE, Continuation::BarsReceived(handle))
            .await;

        registry
            .dispatch_error(FETCH_ID_BASE, 200, "No security definition found")
            .await
            .unwrap();

        let ins = arena.get(handle).await.unwrap();
        assert!(ins.has_error().await);
        assert_eq!(registry.pending().await, 0);
    }

    #[tokio::test]
    async fn test_other_error_codes_are_ignored() {
        let (arena, registry, handle) = registry_with_stock().await;
        registry
            .register(FETCH_ID_BASE, Continuation::BarsReceived(handle))
            .await;

        registry
            .dispatch_error(FETCH_ID_BASE, 2104, "Market data farm connection is OK")
            .await
            .unwrap();

        let ins = arena.get(handle).await.unwrap();
        assert!(!ins.has_error().await);
        assert_eq!(registry.pending().await, 1);
    }
}
