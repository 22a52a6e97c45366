//! # Archive Data
//!
//! 가격 히스토리 카탈로그 게이트웨이.
//!
//! 파이프라인 코어가 소비하는 저장소 경계(`Catalog` 트레이트)와
//! 두 가지 구현을 제공합니다:
//! - `PgCatalog`: sqlx/Postgres 구현 (버킷 스키마 네이밍)
//! - `MemoryCatalog`: 테스트와 드라이런용 인메모리 구현

pub mod catalog;
pub mod error;
pub mod memory;
pub mod postgres;

pub use catalog::{BarRow, Catalog, ExpiredTable};
pub use error::{DataError, Result};
pub use memory::MemoryCatalog;
pub use postgres::PgCatalog;
