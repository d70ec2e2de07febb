//! # SLT (Serial Link Transfer)
//!
//! 신뢰할 수 없는 바이트 링크(시리얼 등) 위의 stop-and-wait ARQ 전송 프로토콜
//!
//! ## 핵심 특징
//! - **고정 크기 프레임**: 페이로드를 청크로 나눠 프레임 하나에 하나씩
//! - **프레임 암호화**: 사전 공유 키 + ChaCha20-Poly1305 (프레임마다 새 nonce)
//! - **무결성 검증**: 평문 BLAKE3 체크섬 접두사 + AEAD 태그
//! - **Stop-and-wait**: 프레임 하나 보내고 `ACK<seq>` 대기, 타임아웃 시 재전송
//! - **명시적 종료**: FIN 프레임
//! - **유한 재시도**: 재전송 예산, 핸드쉐이크/세션 데드라인을 설정으로 제어
//!
//! ```no_run
//! # async fn demo() -> slt::Result<()> {
//! let (a, b) = slt::link::memory_pair(4096);
//! let receiver = tokio::spawn(async move { slt::receive(b, "shared secret", "out.bin").await });
//! slt::send(b"payload", a, "shared secret").await?;
//! receiver.await.expect("receiver task")?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod crypto;
pub mod error;
pub mod frame;
pub mod link;
pub mod message;
pub mod receiver;
pub mod sender;
pub mod simulator;
pub mod stats;

pub use config::Config;
pub use crypto::{CryptoError, FrameCipher, SessionKey};
pub use error::{Error, Result};
pub use frame::{DecodedFrame, Frame, FrameCodec, FrameLayout, SeqField};
pub use link::Link;
pub use message::AckMessage;
pub use receiver::{receive, Receiver};
pub use sender::{send, Sender};
pub use stats::TransferStats;

/// 기본 청크 크기 (바이트)
pub const DEFAULT_CHUNK_SIZE: usize = 80;

/// 기본 체크섬 접두사 길이 (hex 문자)
pub const DEFAULT_CHECKSUM_LEN: usize = 10;

/// 시퀀스 필드 길이 (ASCII 10자리)
pub const SEQ_FIELD_LEN: usize = 10;

/// 종료 마커 (시퀀스 필드에 0 패딩되어 들어감)
pub const FIN_MARKER: &str = "FIN";
