//! 수집 파이프라인 스테이지 모듈.

use std::sync::Arc;

use chrono::NaiveDateTime;

use archive_core::Instrument;
use archive_data::Catalog;

use crate::error::Result;

pub mod discovery;
pub mod fetch;
pub mod persist;
pub mod scheduler;

/// 종목의 마지막 갱신 시각 조회. 디스크립터 캐시를 우선 사용하고,
/// 없으면 카탈로그에서 읽어 캐시합니다. 테이블 부재는 갱신 이력
/// 없음으로 취급합니다.
pub(crate) async fn load_last_update(
    catalog: &Arc<dyn Catalog>,
    instrument: &Arc<Instrument>,
) -> Result<Option<NaiveDateTime>> {
    if let Some(cached) = instrument.cached_last_update().await {
        return Ok(cached);
    }

    let last_update = if catalog.table_exists(&instrument.identity).await? {
        catalog.last_update(&instrument.identity).await?
    } else {
        None
    };
    instrument.cache_last_update(last_update).await;
    Ok(last_update)
}
