//! 종목 디스크립터.
//!
//! 주식 또는 옵션 계약 하나의 불변 식별 정보와 가변 수집 상태를 담습니다.
//! 식별 정보(심볼, 종류, 행사가, 권리, 만기)는 생성 후 변경되지 않으며,
//! 수집 상태는 상관관계 레지스트리를 통해 디스패치되는 응답으로만 갱신됩니다.
//!
//! 저장 스키마 네이밍 규칙:
//! - 주식: `Data_STK` 스키마의 `<Symbol>_STK` 테이블
//! - 옵션: `Data_OPT_<MonYY>` 스키마의 `<Symbol>_OPT_<DDMonYY>` 테이블

use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify};

use crate::arena::InstrumentHandle;
use crate::error::{CoreError, Result};

/// 증권 종류.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecurityKind {
    /// 주식 (ETF 포함)
    Stock,
    /// 상장 옵션
    Option,
}

impl SecurityKind {
    /// 업스트림 API 표기 문자열로 변환
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stock => "STK",
            Self::Option => "OPT",
        }
    }
}

/// 옵션 권리 (콜/풋).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptionRight {
    Call,
    Put,
}

impl OptionRight {
    /// 저장/요청에 사용하는 단일 문자 표기
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Call => "C",
            Self::Put => "P",
        }
    }
}

/// 옵션 계약 조건. 생성 후 불변.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionTerms {
    /// 행사가
    pub strike: Decimal,
    /// 권리 (콜/풋)
    pub right: OptionRight,
    /// 만기일
    pub expiry: NaiveDate,
}

/// 종목의 불변 식별 정보.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// 기초자산 심볼 (예: "AAPL", "BRK.B")
    pub symbol: String,
    /// 증권 종류
    pub kind: SecurityKind,
    /// 옵션 계약 조건 (주식이면 None)
    pub terms: Option<OptionTerms>,
}

/// 장 마감 기준 최종 갱신 컷오프. 만기일 자정 + 21시간 45분.
pub const EXPIRY_CUTOFF_MINUTES: i64 = 21 * 60 + 45;

impl Identity {
    /// 주식 식별 정보 생성
    pub fn stock(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            kind: SecurityKind::Stock,
            terms: None,
        }
    }

    /// 옵션 식별 정보 생성
    pub fn option(
        symbol: impl Into<String>,
        strike: Decimal,
        right: OptionRight,
        expiry: NaiveDate,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            kind: SecurityKind::Option,
            terms: Some(OptionTerms {
                strike,
                right,
                expiry,
            }),
        }
    }

    /// 옵션 계약 조건 접근. 주식이면 `UnsupportedSecurityKind`.
    pub fn option_terms(&self) -> Result<&OptionTerms> {
        self.terms
            .as_ref()
            .ok_or_else(|| CoreError::UnsupportedSecurityKind(self.kind.as_str().to_string()))
    }

    /// 옵션 만기일
    pub fn expiry(&self) -> Result<NaiveDate> {
        Ok(self.option_terms()?.expiry)
    }

    /// 만기 + 21시간 45분 컷오프 시각. 이 시각 이후 데이터가 저장되어 있으면
    /// 해당 옵션은 완전히 백필된 것으로 간주합니다.
    pub fn expiry_cutoff(&self) -> Result<NaiveDateTime> {
        let expiry = self.expiry()?;
        Ok(expiry.and_time(chrono::NaiveTime::MIN) + Duration::minutes(EXPIRY_CUTOFF_MINUTES))
    }

    /// 테이블 이름에 사용하는 심볼 (점 제거, 예: "BRK.B" → "BRKB")
    pub fn table_symbol(&self) -> String {
        self.symbol.replace('.', "")
    }

    /// 버킷 스키마 이름: `Data_STK` 또는 `Data_OPT_<MonYY>`
    pub fn database_name(&self) -> Result<String> {
        match self.kind {
            SecurityKind::Stock => Ok("Data_STK".to_string()),
            SecurityKind::Option => {
                let expiry = self.expiry()?;
                Ok(format!("Data_OPT_{}", expiry.format("%b%y")))
            }
        }
    }

    /// 테이블 이름: `<Symbol>_STK` 또는 `<Symbol>_OPT_<DDMonYY>`
    pub fn table_name(&self) -> Result<String> {
        match self.kind {
            SecurityKind::Stock => Ok(format!("{}_STK", self.table_symbol())),
            SecurityKind::Option => {
                let expiry = self.expiry()?;
                Ok(format!(
                    "{}_OPT_{}",
                    self.table_symbol(),
                    expiry.format("%d%b%y")
                ))
            }
        }
    }

    /// 옵션 행 식별자: `<DDMonYY>_<Symbol>_<Strike>_<Right>`
    pub fn option_identifier(&self) -> Result<String> {
        let terms = self.option_terms()?;
        Ok(format!(
            "{}_{}_{}_{}",
            terms.expiry.format("%d%b%y"),
            self.symbol,
            terms.strike.normalize(),
            terms.right.as_str()
        ))
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.kind, &self.terms) {
            (SecurityKind::Option, Some(terms)) => write!(
                f,
                "{} {}{} {} OPT",
                self.symbol,
                terms.strike.normalize(),
                terms.right.as_str(),
                terms.expiry.format("%d%b%y")
            ),
            _ => write!(f, "{} STK", self.symbol),
        }
    }
}

/// OHLC 캔들 값.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ohlc {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

/// 종목의 가변 수집 상태.
///
/// `error`와 `history_complete`는 진행 중인 요청 하나에 대한
/// 상호 배타적인 종결 마커이며, 새 요청 시작 시 함께 초기화됩니다.
#[derive(Debug, Default)]
pub struct FetchState {
    /// 업스트림 내부 계약 ID (주식은 조회 전 None, 옵션은 부모 주식에 종속)
    pub con_id: Option<i64>,
    /// 수신한 캔들 (타임스탬프 → OHLC)
    pub bars: BTreeMap<NaiveDateTime, Ohlc>,
    /// 카탈로그 기준 마지막 저장 시각 (최초 접근 시 지연 로드 후 캐시)
    pub last_update: Option<NaiveDateTime>,
    /// `last_update` 캐시 적재 여부 (None과 "미적재" 구분)
    pub last_update_loaded: bool,
    /// 업스트림 에러 마커
    pub error: bool,
    /// 히스토리 수신 완료 마커
    pub history_complete: bool,
}

/// 주식의 옵션 체인 상태.
///
/// 만기/행사가 리스트는 중복 없이 증가만 하며 줄어들지 않습니다.
#[derive(Debug, Default)]
pub struct ChainState {
    /// 알려진 만기일 (수신 순서 유지)
    pub expiries: Vec<NaiveDate>,
    /// 알려진 행사가 (수신 순서 유지)
    pub strikes: Vec<Decimal>,
}

/// 종목 디스크립터.
///
/// 아레나가 소유하며 풀에는 핸들만 들어갑니다. 상태 변경은 모두
/// 짧은 임계 구역 안에서 수행되고, 변경 시 `Notify`로 대기자를 깨웁니다.
#[derive(Debug)]
pub struct Instrument {
    handle: InstrumentHandle,
    /// 불변 식별 정보
    pub identity: Identity,
    state: Mutex<FetchState>,
    chain: Mutex<ChainState>,
    children: Mutex<Vec<InstrumentHandle>>,
    notify: Notify,
}

impl Instrument {
    pub(crate) fn new(handle: InstrumentHandle, identity: Identity) -> Self {
        Self {
            handle,
            identity,
            state: Mutex::new(FetchState::default()),
            chain: Mutex::new(ChainState::default()),
            children: Mutex::new(Vec::new()),
            notify: Notify::new(),
        }
    }

    /// 아레나 핸들
    pub fn handle(&self) -> InstrumentHandle {
        self.handle
    }

    /// 응답 대기용 Notify 등록.
    ///
    /// 깨어남 유실을 막기 위해 플래그 확인 전에 먼저 호출해야 합니다.
    pub fn notified(&self) -> tokio::sync::futures::Notified<'_> {
        self.notify.notified()
    }

    /// 내부 계약 ID 설정 (id 조회 응답)
    pub async fn set_con_id(&self, con_id: i64) {
        self.state.lock().await.con_id = Some(con_id);
        self.notify.notify_waiters();
    }

    /// 내부 계약 ID 조회
    pub async fn con_id(&self) -> Option<i64> {
        self.state.lock().await.con_id
    }

    /// 새 히스토리 요청 시작: 종결 마커 초기화
    pub async fn begin_request(&self) {
        let mut state = self.state.lock().await;
        state.error = false;
        state.history_complete = false;
    }

    /// 수신 캔들 저장 (동일 타임스탬프는 덮어씀)
    pub async fn push_bar(&self, stamp: NaiveDateTime, ohlc: Ohlc) {
        self.state.lock().await.bars.insert(stamp, ohlc);
    }

    /// 수신 캔들 스냅샷
    pub async fn bars_snapshot(&self) -> BTreeMap<NaiveDateTime, Ohlc> {
        self.state.lock().await.bars.clone()
    }

    /// 영속화 완료한 캔들 버퍼 비우기
    pub async fn clear_bars(&self) {
        self.state.lock().await.bars.clear();
    }

    /// 에러 마커 설정 (대기자 해제)
    pub async fn mark_error(&self) {
        self.state.lock().await.error = true;
        self.notify.notify_waiters();
    }

    /// 에러 마커 조회
    pub async fn has_error(&self) -> bool {
        self.state.lock().await.error
    }

    /// 히스토리 완료 마커 설정 (대기자 해제)
    pub async fn mark_history_complete(&self) {
        self.state.lock().await.history_complete = true;
        self.notify.notify_waiters();
    }

    /// 히스토리 완료 마커 조회
    pub async fn history_complete(&self) -> bool {
        self.state.lock().await.history_complete
    }

    /// 캐시된 마지막 저장 시각 조회.
    ///
    /// 바깥 `None`은 "아직 카탈로그에서 읽지 않음"을 뜻합니다.
    pub async fn cached_last_update(&self) -> Option<Option<NaiveDateTime>> {
        let state = self.state.lock().await;
        if state.last_update_loaded {
            Some(state.last_update)
        } else {
            None
        }
    }

    /// 카탈로그에서 읽은 마지막 저장 시각 캐시
    pub async fn cache_last_update(&self, last_update: Option<NaiveDateTime>) {
        let mut state = self.state.lock().await;
        state.last_update = last_update;
        state.last_update_loaded = true;
    }

    /// 마지막 저장 시각 캐시 무효화 (새 행이 기록된 뒤 호출)
    pub async fn invalidate_last_update(&self) {
        self.state.lock().await.last_update_loaded = false;
    }

    /// 체인 데이터 병합 (중복 제거, 증가 전용)
    pub async fn merge_chain(&self, expiries: &[NaiveDate], strikes: &[Decimal]) {
        {
            let mut chain = self.chain.lock().await;
            for expiry in expiries {
                if !chain.expiries.contains(expiry) {
                    chain.expiries.push(*expiry);
                }
            }
            for strike in strikes {
                if !chain.strikes.contains(strike) {
                    chain.strikes.push(*strike);
                }
            }
        }
        self.notify.notify_waiters();
    }

    /// 체인 스냅샷 (만기, 행사가)
    pub async fn chain_snapshot(&self) -> (Vec<NaiveDate>, Vec<Decimal>) {
        let chain = self.chain.lock().await;
        (chain.expiries.clone(), chain.strikes.clone())
    }

    /// 체인 데이터 보유 여부
    pub async fn has_chain(&self) -> bool {
        let chain = self.chain.lock().await;
        !chain.expiries.is_empty() || !chain.strikes.is_empty()
    }

    /// 파생 옵션 자식 등록 (주식 전용)
    pub async fn register_child(&self, child: InstrumentHandle) {
        self.children.lock().await.push(child);
    }

    /// 등록된 파생 옵션 핸들
    pub async fn children(&self) -> Vec<InstrumentHandle> {
        self.children.lock().await.clone()
    }
}
