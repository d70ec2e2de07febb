//! 프레임 정의와 코덱
//!
//! 와이어 레이아웃 (고정 길이):
//!
//! ```text
//! |<- 12 ->|<------ 2 + chunk_size + 16 ------>|<- checksum_len ->|<- 10 ->|
//! +--------+-----------------------------------+------------------+--------+
//! | nonce  | AEAD(len:u16le ‖ chunk ‖ 0-pad)   | BLAKE3 hex 접두사 | 시퀀스  |
//! +--------+-----------------------------------+------------------+--------+
//! ```
//!
//! 시퀀스 필드는 0 패딩 10자리 십진수 또는 `0000000FIN`.
//! 체크섬/시퀀스 필드는 AEAD의 associated data로 묶임.

use std::fmt;

use bytes::Bytes;

use crate::crypto::{checksum_prefix, FrameCipher, SessionKey, NONCE_SIZE, SEAL_OVERHEAD};
use crate::config::MAX_CHECKSUM_LEN;
use crate::{Config, Error, Result, FIN_MARKER, SEQ_FIELD_LEN};

/// 청크 길이 헤더 크기 (u16 LE)
const LEN_PREFIX_SIZE: usize = 2;

/// 시퀀스 필드 값
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SeqField {
    /// 데이터 프레임 (1부터)
    Data(u32),
    /// 전송 종료
    Fin,
}

impl SeqField {
    /// 10자리 ASCII로 인코딩
    pub fn encode(&self) -> [u8; SEQ_FIELD_LEN] {
        let text = match self {
            SeqField::Data(seq) => format!("{:0>width$}", seq, width = SEQ_FIELD_LEN),
            SeqField::Fin => format!("{:0>width$}", FIN_MARKER, width = SEQ_FIELD_LEN),
        };
        let mut field = [b'0'; SEQ_FIELD_LEN];
        field.copy_from_slice(text.as_bytes());
        field
    }

    /// 10자리 ASCII에서 파싱
    pub fn parse(field: &[u8]) -> Result<Self> {
        let invalid = || Error::InvalidSequenceField(String::from_utf8_lossy(field).into_owned());

        if field.len() != SEQ_FIELD_LEN {
            return Err(invalid());
        }
        if field == &SeqField::Fin.encode()[..] {
            return Ok(SeqField::Fin);
        }
        if !field.iter().all(u8::is_ascii_digit) {
            return Err(invalid());
        }

        // 10자리 십진수는 u32 범위를 넘을 수 있음
        std::str::from_utf8(field)
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .map(SeqField::Data)
            .ok_or_else(invalid)
    }

    pub fn is_fin(&self) -> bool {
        matches!(self, SeqField::Fin)
    }
}

impl fmt::Display for SeqField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeqField::Data(seq) => write!(f, "{}", seq),
            SeqField::Fin => f.write_str(FIN_MARKER),
        }
    }
}

/// 인코딩된 프레임 (송신 단위)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub seq: SeqField,
    pub bytes: Bytes,
}

impl Frame {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// 디코딩 결과
///
/// 검증 실패는 에러가 아니라 `checksum_ok = false`로 보고됨
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    pub seq: SeqField,
    /// 복호화된 평문 (검증 실패 시 비어 있을 수 있음)
    pub payload: Bytes,
    pub checksum_ok: bool,
}

/// 프레임 레이아웃 (필드 폭)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLayout {
    pub chunk_size: usize,
    pub checksum_len: usize,
}

impl FrameLayout {
    pub fn from_config(config: &Config) -> Self {
        Self {
            chunk_size: config.chunk_size,
            checksum_len: config.checksum_len,
        }
    }

    /// 필드 폭 검증
    ///
    /// 청크 길이는 u16 헤더에 들어가야 하고 체크섬은 BLAKE3 hex 길이를 넘을 수 없음
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 || self.chunk_size > u16::MAX as usize {
            return Err(Error::InvalidConfig(format!(
                "chunk_size must be in 1..=65535, got {}",
                self.chunk_size
            )));
        }
        if self.checksum_len == 0 || self.checksum_len > MAX_CHECKSUM_LEN {
            return Err(Error::InvalidConfig(format!(
                "checksum_len must be in 1..={}, got {}",
                MAX_CHECKSUM_LEN, self.checksum_len
            )));
        }
        Ok(())
    }

    /// 봉인 영역 길이
    pub fn sealed_len(&self) -> usize {
        SEAL_OVERHEAD + LEN_PREFIX_SIZE + self.chunk_size
    }

    /// 전체 프레임 길이
    pub fn frame_len(&self) -> usize {
        self.sealed_len() + self.checksum_len + SEQ_FIELD_LEN
    }

    /// 암호문 영역 (nonce 이후, 체크섬 이전) 범위
    pub fn ciphertext_range(&self) -> std::ops::Range<usize> {
        NONCE_SIZE..self.sealed_len()
    }

    /// 시퀀스 필드 범위
    pub fn seq_range(&self) -> std::ops::Range<usize> {
        let end = self.frame_len();
        end - SEQ_FIELD_LEN..end
    }
}

impl Default for FrameLayout {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// 프레임 코덱
///
/// 세션 키와 레이아웃만 가지며 가변 상태 없음
#[derive(Debug, Clone)]
pub struct FrameCodec {
    cipher: FrameCipher,
    layout: FrameLayout,
}

impl FrameCodec {
    /// 새 코덱 생성. 레이아웃 범위를 벗어나면 `InvalidConfig`
    pub fn new(key: &SessionKey, layout: FrameLayout) -> Result<Self> {
        layout.validate()?;
        Ok(Self {
            cipher: FrameCipher::new(key)?,
            layout,
        })
    }

    pub fn layout(&self) -> FrameLayout {
        self.layout
    }

    pub fn frame_len(&self) -> usize {
        self.layout.frame_len()
    }

    /// 청크를 프레임으로 인코딩
    pub fn encode(&self, chunk: &[u8], seq: SeqField) -> Result<Frame> {
        let chunk_size = self.layout.chunk_size;
        if chunk.len() > chunk_size {
            return Err(Error::ChunkTooLarge {
                max: chunk_size,
                got: chunk.len(),
            });
        }

        let checksum = checksum_prefix(chunk, self.layout.checksum_len);
        let seq_field = seq.encode();
        let aad = Self::associated_data(checksum.as_bytes(), &seq_field);

        // 길이 헤더 + 청크 + 0 패딩 (고정 크기 블록)
        let mut block = Vec::with_capacity(LEN_PREFIX_SIZE + chunk_size);
        block.extend_from_slice(&(chunk.len() as u16).to_le_bytes());
        block.extend_from_slice(chunk);
        block.resize(LEN_PREFIX_SIZE + chunk_size, 0);

        let sealed = self.cipher.seal(&aad, &block)?;

        let mut buf = Vec::with_capacity(self.layout.frame_len());
        buf.extend_from_slice(&sealed);
        buf.extend_from_slice(checksum.as_bytes());
        buf.extend_from_slice(&seq_field);
        debug_assert_eq!(buf.len(), self.layout.frame_len());

        Ok(Frame {
            seq,
            bytes: Bytes::from(buf),
        })
    }

    /// 프레임 디코딩 및 검증
    ///
    /// 길이가 맞지 않거나 시퀀스 필드를 읽을 수 없으면 프레이밍 에러.
    /// 태그/체크섬 불일치는 `checksum_ok = false`
    pub fn decode(&self, frame: &[u8]) -> Result<DecodedFrame> {
        let expected = self.layout.frame_len();
        if frame.len() != expected {
            return Err(Error::Framing {
                expected,
                got: frame.len(),
            });
        }

        let sealed_len = self.layout.sealed_len();
        let sealed = &frame[..sealed_len];
        let checksum = &frame[sealed_len..sealed_len + self.layout.checksum_len];
        let seq_field = &frame[self.layout.seq_range()];

        let seq = SeqField::parse(seq_field)?;
        let aad = Self::associated_data(checksum, seq_field);

        let block = match self.cipher.open(&aad, sealed) {
            Ok(block) => block,
            Err(_) => return Ok(Self::rejected(seq)),
        };

        let len = u16::from_le_bytes([block[0], block[1]]) as usize;
        if len > self.layout.chunk_size {
            return Ok(Self::rejected(seq));
        }
        let payload = Bytes::copy_from_slice(&block[LEN_PREFIX_SIZE..LEN_PREFIX_SIZE + len]);

        let recomputed = checksum_prefix(&payload, self.layout.checksum_len);
        let checksum_ok = recomputed.as_bytes() == checksum;

        Ok(DecodedFrame {
            seq,
            payload,
            checksum_ok,
        })
    }

    fn associated_data(checksum: &[u8], seq_field: &[u8]) -> Vec<u8> {
        let mut aad = Vec::with_capacity(checksum.len() + seq_field.len());
        aad.extend_from_slice(checksum);
        aad.extend_from_slice(seq_field);
        aad
    }

    fn rejected(seq: SeqField) -> DecodedFrame {
        DecodedFrame {
            seq,
            payload: Bytes::new(),
            checksum_ok: false,
        }
    }
}

/// 페이로드 분할 시 청크 수
pub fn chunk_count(payload_len: usize, chunk_size: usize) -> usize {
    (payload_len + chunk_size - 1) / chunk_size
}
