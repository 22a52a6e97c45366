//! 아카이버 코어 에러 타입.

use thiserror::Error;

/// 파이프라인 코어 에러.
#[derive(Debug, Error)]
pub enum CoreError {
    /// 등록되지 않았거나 이미 소비된 요청 ID에 대한 응답
    #[error("Unknown request id: {0}")]
    UnknownRequest(i64),

    /// 등록된 continuation 종류와 맞지 않는 응답 페이로드
    #[error("Reply payload does not match the registered continuation for request id {0}")]
    ReplyMismatch(i64),

    /// 아레나에 존재하지 않는 디스크립터 핸들
    #[error("Invalid instrument handle: {0}")]
    InvalidHandle(usize),

    /// 요청 기간 계산 불변식 위반
    #[error("Invalid historical duration: {0} weeks")]
    InvalidDuration(i64),

    /// 지원하지 않는 증권 종류에 대한 연산
    #[error("Unsupported security kind: {0}")]
    UnsupportedSecurityKind(String),

    /// 업스트림 API 요청 실패
    #[error("Upstream error: {0}")]
    Upstream(String),
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, CoreError>;
