//! 카탈로그 경계 트레이트.
//!
//! 파이프라인 코어가 소비하는 저장소 연산의 계약입니다. 모든 연산은
//! 호출 범위 안에서 연결을 획득/반납하며, 실패는 `StoreUnavailable`로
//! 표면화되어 호출 스테이지의 다음 자연 패스에서 재시도됩니다.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};

use archive_core::{Identity, Ohlc};

use crate::error::Result;

/// 영속화 대상 캔들 한 행.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BarRow {
    /// 캔들 타임스탬프
    pub stamp: NaiveDateTime,
    /// OHLC 값
    pub ohlc: Ohlc,
}

/// 만기 재스캔이 발견한 옵션 테이블 참조.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiredTable {
    /// 테이블 심볼 (점 제거 형태, 예: "BRKB")
    pub symbol: String,
    /// 테이블 이름에서 파싱한 만기일
    pub expiry: NaiveDate,
}

/// 가격 히스토리 카탈로그.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// 종목의 스키마/테이블 존재 보장 (없으면 생성)
    async fn ensure_table(&self, instrument: &Identity) -> Result<()>;

    /// 종목 테이블 존재 여부
    async fn table_exists(&self, instrument: &Identity) -> Result<bool>;

    /// 마지막 저장 시각 (없으면 None). 옵션은 행사가/권리로 필터.
    async fn last_update(&self, instrument: &Identity) -> Result<Option<NaiveDateTime>>;

    /// 이미 저장된 타임스탬프 집합 (중복 저장 방지용)
    async fn existing_timestamps(&self, instrument: &Identity) -> Result<HashSet<NaiveDateTime>>;

    /// 행 일괄 저장. 저장된 행 수를 반환.
    async fn write_batch(&self, instrument: &Identity, rows: &[BarRow]) -> Result<u64>;

    /// 만기일이 주어진 날짜들에 해당하는 옵션 테이블 나열
    async fn list_expired_option_tables(&self, expiries: &[NaiveDate]) -> Result<Vec<ExpiredTable>>;

    /// 갱신 체크포인트 로드 (예: "stock_refresh", "expired_refresh")
    async fn load_checkpoint(&self, workflow: &str) -> Result<Option<NaiveDateTime>>;

    /// 갱신 체크포인트 저장
    async fn save_checkpoint(&self, workflow: &str, at: NaiveDateTime) -> Result<()>;
}
