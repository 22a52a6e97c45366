//! 카탈로그 모듈 오류 타입.

use thiserror::Error;

/// 카탈로그 관련 오류.
#[derive(Debug, Error)]
pub enum DataError {
    /// 저장소 접근 실패 (쿼리/연결). 호출 스테이지가 다음 패스에서 재시도.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[from] sqlx::Error),

    /// 잘못된 종목 식별 정보로의 카탈로그 호출
    #[error("Invalid instrument: {0}")]
    Instrument(#[from] archive_core::CoreError),

    /// 해석할 수 없는 테이블 이름
    #[error("Invalid table name: {0}")]
    InvalidTableName(String),
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, DataError>;
