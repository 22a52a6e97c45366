//! 디스크립터 아레나.
//!
//! 모든 종목 디스크립터를 한 곳에서 소유하고 안정적인 정수 핸들로
//! 주소를 부여합니다. 풀과 큐에는 핸들만 들어가므로 어느 풀이 객체를
//! "소유"하는지에 대한 모호함이 없습니다. 아레나는 추가 전용입니다.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::instrument::{Identity, Instrument};

/// 아레나 내 디스크립터의 안정적인 주소.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstrumentHandle(pub(crate) usize);

impl InstrumentHandle {
    /// 핸들의 정수값
    pub fn index(&self) -> usize {
        self.0
    }
}

impl std::fmt::Display for InstrumentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 추가 전용 디스크립터 아레나.
#[derive(Debug, Default)]
pub struct InstrumentArena {
    entries: RwLock<Vec<Arc<Instrument>>>,
}

impl InstrumentArena {
    /// 빈 아레나 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 디스크립터 생성 및 등록, 핸들과 참조를 반환
    pub async fn insert(&self, identity: Identity) -> (InstrumentHandle, Arc<Instrument>) {
        let mut entries = self.entries.write().await;
        let handle = InstrumentHandle(entries.len());
        let instrument = Arc::new(Instrument::new(handle, identity));
        entries.push(Arc::clone(&instrument));
        (handle, instrument)
    }

    /// 핸들로 디스크립터 조회
    pub async fn get(&self, handle: InstrumentHandle) -> Option<Arc<Instrument>> {
        self.entries.read().await.get(handle.0).cloned()
    }

    /// 등록된 디스크립터 수
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// 아레나가 비어 있는지 여부
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_assigns_sequential_handles() {
        let arena = InstrumentArena::new();
        let (h1, _) = arena.insert(Identity::stock("SPY")).await;
        let (h2, _) = arena.insert(Identity::stock("QQQ")).await;

        assert_eq!(h1.index(), 0);
        assert_eq!(h2.index(), 1);
        assert_eq!(arena.len().await, 2);
    }

    #[tokio::test]
    async fn test_get_returns_same_descriptor() {
        let arena = InstrumentArena::new();
        let (handle, ins) = arena.insert(Identity::stock("IWM")).await;

        let fetched = arena.get(handle).await.unwrap();
        assert!(Arc::ptr_eq(&ins, &fetched));
        assert!(arena.get(InstrumentHandle(99)).await.is_none());
    }
}
