//! 프로토콜 설정

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::frame::FrameLayout;
use crate::{Error, Result, DEFAULT_CHECKSUM_LEN, DEFAULT_CHUNK_SIZE};

/// 체크섬 필드 최대 폭 (BLAKE3 hex 다이제스트 길이)
pub const MAX_CHECKSUM_LEN: usize = 64;

/// SLT 세션 설정
///
/// 송신자와 수신자가 같은 `chunk_size`/`checksum_len`을 사용해야 함
/// (협상 없음, 프레임 크기가 여기서 결정됨)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 청크 크기 (바이트)
    pub chunk_size: usize,

    /// 체크섬 접두사 길이 (hex 문자 수)
    pub checksum_len: usize,

    /// ACK 대기 타임아웃 (밀리초)
    /// 이 시간 안에 ACK가 없으면 같은 프레임 재전송
    pub ack_timeout_ms: u64,

    /// 프레임당 최대 재전송 횟수
    /// None이면 무제한 (피어가 응답하지 않으면 영원히 재전송)
    pub max_retransmissions: Option<u32>,

    /// ACK0 대기 타임아웃 (밀리초), None이면 무한 대기
    pub handshake_timeout_ms: Option<u64>,

    /// 전체 세션 데드라인 (밀리초), None이면 제한 없음
    pub session_timeout_ms: Option<u64>,

    /// 첫 프레임 수신 전까지 ACK0 재전송 간격 (밀리초)
    pub start_ack_interval_ms: Option<u64>,

    /// 프레임 수신 대기 타임아웃 (밀리초)
    pub idle_timeout_ms: Option<u64>,

    /// 이미 수락한 프레임이 다시 오면 ACK 재전송
    /// ACK 손실 시 stop-and-wait 교착 방지
    pub reack_duplicates: bool,

    /// 연속 무결성 실패 허용 횟수, 초과 시 세션 실패
    pub max_consecutive_rejects: Option<u32>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            checksum_len: DEFAULT_CHECKSUM_LEN,
            ack_timeout_ms: 1000,             // 1초
            max_retransmissions: Some(16),
            handshake_timeout_ms: Some(30_000), // 30초
            session_timeout_ms: None,
            start_ack_interval_ms: Some(1000),
            idle_timeout_ms: None,
            reack_duplicates: true,
            max_consecutive_rejects: None,
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// TOML 문자열에서 설정 로드 (빠진 필드는 기본값)
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정 로드
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// 값 범위 검증
    pub fn validate(&self) -> Result<()> {
        FrameLayout::from_config(self).validate()?;
        if self.ack_timeout_ms == 0 {
            return Err(Error::InvalidConfig("ack_timeout_ms must be non-zero".into()));
        }
        Ok(())
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Option<Duration> {
        self.handshake_timeout_ms.map(Duration::from_millis)
    }

    pub fn session_timeout(&self) -> Option<Duration> {
        self.session_timeout_ms.map(Duration::from_millis)
    }

    pub fn start_ack_interval(&self) -> Option<Duration> {
        self.start_ack_interval_ms.map(Duration::from_millis)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_ms.map(Duration::from_millis)
    }

    /// 초기 프로토콜 타이밍
    /// 재전송 무제한, 핸드쉐이크 무한 대기, 중복 재ACK 없음
    pub fn legacy() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            checksum_len: DEFAULT_CHECKSUM_LEN,
            ack_timeout_ms: 1000,
            max_retransmissions: None,
            handshake_timeout_ms: None,
            session_timeout_ms: None,
            start_ack_interval_ms: None,
            idle_timeout_ms: None,
            reack_duplicates: false,
            max_consecutive_rejects: None,
        }
    }

    /// 느린 링크용 설정 (저속 보레이트, 무선 모뎀 등)
    pub fn slow_link() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            checksum_len: DEFAULT_CHECKSUM_LEN,
            ack_timeout_ms: 5000,             // 5초
            max_retransmissions: Some(32),
            handshake_timeout_ms: Some(120_000),
            session_timeout_ms: None,
            start_ack_interval_ms: Some(5000),
            idle_timeout_ms: Some(300_000),   // 5분
            reack_duplicates: true,
            max_consecutive_rejects: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(Config::default().validate().is_ok());
        assert!(Config::legacy().validate().is_ok());
        assert!(Config::slow_link().validate().is_ok());
    }

    #[test]
    fn test_legacy_is_unbounded() {
        let config = Config::legacy();
        assert_eq!(config.max_retransmissions, None);
        assert_eq!(config.handshake_timeout(), None);
        assert_eq!(config.session_timeout(), None);
        assert_eq!(config.ack_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = Config::from_toml_str(
            r#"
            ack_timeout_ms = 250
            max_retransmissions = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.ack_timeout_ms, 250);
        assert_eq!(config.max_retransmissions, Some(3));
        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
        assert!(config.reack_duplicates);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = Config::from_toml_str("chunk_size = 0").unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));

        let err = Config::from_toml_str("checksum_len = 65").unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));

        let err = Config::from_toml_str("ack_timeout_ms = 0").unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_malformed_toml() {
        let err = Config::from_toml_str("chunk_size = \"big\"").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
