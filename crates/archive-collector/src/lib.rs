//! 가격 히스토리 수집기.
//!
//! 기초자산과 옵션 체인을 발굴해 일일 주기로 캔들 히스토리를
//! 내려받고 카탈로그에 영속화하는 상주 수집기입니다.

pub mod config;
pub mod error;
pub mod modules;
pub mod pipeline;
pub mod sim;
pub mod stats;
pub mod timer;

pub use config::ArchiverConfig;
pub use error::{ArchiverError, Result};
pub use pipeline::PipelineContext;
pub use sim::SimSource;
