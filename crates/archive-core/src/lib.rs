//! # Archive Core
//!
//! 히스토리 캔들 아카이버의 핵심 도메인 모델 및 동시성 상태를 제공합니다.
//!
//! 이 크레이트는 수집 파이프라인 전반에서 사용되는 기본 타입을 제공합니다:
//! - 종목 디스크립터 (주식 / 옵션 계약)
//! - 핸들 기반 디스크립터 아레나
//! - 계약 풀 (주식 / 옵션 / 만기 옵션)
//! - 요청 ID 상관관계 레지스트리
//! - 업스트림 시세 소스 추상화 (`MarketDataSource`)
//! - 요청 기간 계산 및 타임아웃 버킷 테이블

pub mod arena;
pub mod error;
pub mod instrument;
pub mod pools;
pub mod registry;
pub mod source;

pub use arena::{InstrumentArena, InstrumentHandle};
pub use error::{CoreError, Result};
pub use instrument::{
    ChainState, FetchState, Identity, Instrument, Ohlc, OptionRight, OptionTerms, SecurityKind,
    EXPIRY_CUTOFF_MINUTES,
};
pub use pools::ContractPools;
pub use registry::{Continuation, Reply, RequestIds, RequestRegistry, FETCH_ID_BASE};
pub use source::{BarRequestOptions, FetchSpan, MarketDataSource, TimeoutTable};
