//! 에러 타입 정의

use thiserror::Error;

use crate::crypto::CryptoError;
use crate::frame::SeqField;

/// SLT 프로토콜 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("암호화 에러: {0}")]
    Crypto(#[from] CryptoError),

    #[error("설정 파싱 에러: {0}")]
    Config(#[from] toml::de::Error),

    #[error("유효하지 않은 설정: {0}")]
    InvalidConfig(String),

    #[error("세션 키가 비어 있음")]
    EmptyKey,

    #[error("청크 크기 초과: 최대 {max} bytes, got {got} bytes")]
    ChunkTooLarge { max: usize, got: usize },

    #[error("페이로드가 너무 큼: {chunks} 청크 (시퀀스 번호 범위 초과)")]
    PayloadTooLarge { chunks: usize },

    #[error("프레임 길이 불일치: expected {expected}, got {got}")]
    Framing { expected: usize, got: usize },

    #[error("유효하지 않은 시퀀스 필드: {0:?}")]
    InvalidSequenceField(String),

    #[error("무결성 검증 실패: seq={seq}")]
    IntegrityFailure { seq: SeqField },

    #[error("핸드쉐이크 타임아웃: ACK0 미수신")]
    HandshakeTimeout,

    #[error("세션 타임아웃: seq={seq}, {attempts}회 전송 후 ACK 없음")]
    SessionTimedOut { seq: u32, attempts: u32 },

    #[error("FIN 전송 실패: 링크가 막혀 {attempts}회 시도 후 포기")]
    FinStalled { attempts: u32 },

    #[error("세션 데드라인 초과")]
    DeadlineExceeded,

    #[error("수신 대기 타임아웃")]
    IdleTimeout,

    #[error("연결 종료")]
    ConnectionClosed,
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
