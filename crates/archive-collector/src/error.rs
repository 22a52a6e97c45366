//! 에러 타입 정의.

use std::fmt;

use archive_core::CoreError;
use archive_data::DataError;

/// Archiver 에러 타입
#[derive(Debug)]
pub enum ArchiverError {
    /// 파이프라인 코어 에러
    Core(CoreError),
    /// 카탈로그 에러
    Data(DataError),
    /// 설정 에러
    Config(String),
    /// 일반 에러
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl fmt::Display for ArchiverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Core(e) => write!(f, "Pipeline error: {}", e),
            Self::Data(e) => write!(f, "Catalog error: {}", e),
            Self::Config(msg) => write!(f, "Configuration error: {}", msg),
            Self::Other(e) => write!(f, "Error: {}", e),
        }
    }
}

impl std::error::Error for ArchiverError {}

impl From<CoreError> for ArchiverError {
    fn from(err: CoreError) -> Self {
        Self::Core(err)
    }
}

impl From<DataError> for ArchiverError {
    fn from(err: DataError) -> Self {
        Self::Data(err)
    }
}

impl From<sqlx::Error> for ArchiverError {
    fn from(err: sqlx::Error) -> Self {
        Self::Data(DataError::StoreUnavailable(err))
    }
}

impl From<std::env::VarError> for ArchiverError {
    fn from(err: std::env::VarError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<Box<dyn std::error::Error + Send + Sync>> for ArchiverError {
    fn from(err: Box<dyn std::error::Error + Send + Sync>) -> Self {
        Self::Other(err)
    }
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, ArchiverError>;
