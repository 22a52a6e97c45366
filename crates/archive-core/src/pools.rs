//! 계약 풀.
//!
//! 발굴 단계가 채우고 스케줄러가 소비하는 세 개의 공유 풀입니다.
//! 원소는 아레나 핸들이며, 하나의 디스크립터는 동시에 하나의 풀에만
//! 보입니다.
//!
//! - 주식 풀: 커서로 순회하며 제거하지 않음 (일일 타이머로 재방문)
//! - 옵션 풀: 머리에서 평가, 아직 아닌 항목은 꼬리로 회전
//! - 만기 풀: 최종 백필 대상, 소진될 때까지 머리에서 제거

use std::collections::VecDeque;

use tokio::sync::Mutex;

use crate::arena::InstrumentHandle;

/// 공유 계약 풀.
#[derive(Debug, Default)]
pub struct ContractPools {
    /// 주식 풀 (커서 순회, 비파괴)
    pub stocks: Mutex<Vec<InstrumentHandle>>,
    /// 활성 옵션 풀 (회전 큐)
    pub options: Mutex<VecDeque<InstrumentHandle>>,
    /// 만기 옵션 풀 (소진 큐)
    pub expired: Mutex<VecDeque<InstrumentHandle>>,
}

impl ContractPools {
    /// 빈 풀 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 주식 풀에 추가
    pub async fn push_stock(&self, handle: InstrumentHandle) {
        self.stocks.lock().await.push(handle);
    }

    /// 옵션 풀 꼬리에 추가
    pub async fn push_option(&self, handle: InstrumentHandle) {
        self.options.lock().await.push_back(handle);
    }

    /// 만기 풀 꼬리에 추가
    pub async fn push_expired(&self, handle: InstrumentHandle) {
        self.expired.lock().await.push_back(handle);
    }

    /// 옵션 풀 머리 조회 (제거하지 않음)
    pub async fn peek_option(&self) -> Option<InstrumentHandle> {
        self.options.lock().await.front().copied()
    }

    /// 옵션 풀 머리 제거
    pub async fn pop_option(&self) -> Option<InstrumentHandle> {
        self.options.lock().await.pop_front()
    }

    /// 옵션 풀 머리를 꼬리로 회전
    pub async fn rotate_option(&self) {
        let mut options = self.options.lock().await;
        if let Some(head) = options.pop_front() {
            options.push_back(head);
        }
    }

    /// 옵션 풀에서 핸들 제거 (만기 재스캔이 만기 풀로 옮길 때 사용)
    pub async fn remove_options(&self, handles: &[InstrumentHandle]) -> usize {
        let mut options = self.options.lock().await;
        let before = options.len();
        options.retain(|h| !handles.contains(h));
        before - options.len()
    }

    /// 만기 풀 머리 조회 (제거하지 않음)
    pub async fn peek_expired(&self) -> Option<InstrumentHandle> {
        self.expired.lock().await.front().copied()
    }

    /// 만기 풀 머리 제거
    pub async fn pop_expired(&self) -> Option<InstrumentHandle> {
        self.expired.lock().await.pop_front()
    }

    /// (주식, 옵션, 만기) 풀 크기
    pub async fn sizes(&self) -> (usize, usize, usize) {
        let stocks = self.stocks.lock().await.len();
        let options = self.options.lock().await.len();
        let expired = self.expired.lock().await.len();
        (stocks, options, expired)
    }

    /// 모든 풀이 비어 있는지 여부
    pub async fn all_empty(&self) -> bool {
        let (stocks, options, expired) = self.sizes().await;
        stocks == 0 && options == 0 && expired == 0
    }
}
