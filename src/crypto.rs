//! 암호화 모듈 - 사전 공유 키 + ChaCha20-Poly1305 프레임 암호화
//!
//! 흐름:
//! 1. 호출자가 공유 비밀 문자열 제공
//! 2. 16바이트 배수가 되도록 채움 바이트로 패딩 (`SessionKey`)
//! 3. BLAKE3 키 유도로 256비트 암호 키 생성
//! 4. 프레임마다 새 랜덤 nonce로 ChaCha20-Poly1305 봉인/개봉
//!
//! 고정 IV를 재사용하는 CBC 방식은 사용하지 않음

use std::fmt;

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Nonce,
};
use rand_core::{OsRng, RngCore};

/// 키 패딩 블록 크기 (bytes)
pub const KEY_BLOCK_SIZE: usize = 16;

/// 키 패딩 채움 바이트
pub const KEY_PAD_BYTE: u8 = b'{';

/// ChaCha20-Poly1305 nonce 크기 (12 bytes)
pub const NONCE_SIZE: usize = 12;

/// ChaCha20-Poly1305 태그 크기 (16 bytes)
pub const TAG_SIZE: usize = 16;

/// 봉인 오버헤드 (nonce + 태그)
pub const SEAL_OVERHEAD: usize = NONCE_SIZE + TAG_SIZE;

/// BLAKE3 키 유도 컨텍스트
const KDF_CONTEXT: &str = "slt 2024-06 frame cipher v1";

/// 암호화 오류
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("암호화 실패: {0}")]
    EncryptionFailed(String),
    #[error("복호화 실패: {0}")]
    DecryptionFailed(String),
    #[error("잘못된 키 크기")]
    InvalidKeySize,
}

/// 세션 키 (패딩된 공유 비밀)
///
/// 세션마다 한 번 생성, 이후 불변
#[derive(Clone)]
pub struct SessionKey {
    padded: Vec<u8>,
}

impl SessionKey {
    /// 공유 비밀로 세션 키 생성
    ///
    /// 길이가 16의 배수가 될 때까지 `KEY_PAD_BYTE`로 오른쪽 패딩.
    /// 빈 키는 거부
    pub fn new(material: impl AsRef<[u8]>) -> crate::Result<Self> {
        let material = material.as_ref();
        if material.is_empty() {
            return Err(crate::Error::EmptyKey);
        }

        let mut padded = material.to_vec();
        let rem = padded.len() % KEY_BLOCK_SIZE;
        if rem != 0 {
            padded.resize(padded.len() + KEY_BLOCK_SIZE - rem, KEY_PAD_BYTE);
        }

        Ok(Self { padded })
    }

    /// 패딩된 키 바이트
    pub fn padded(&self) -> &[u8] {
        &self.padded
    }

    /// 암호 키 유도 (32 bytes)
    fn cipher_key(&self) -> [u8; 32] {
        blake3::derive_key(KDF_CONTEXT, &self.padded)
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionKey")
            .field("padded_len", &self.padded.len())
            .finish_non_exhaustive()
    }
}

/// 프레임 암호화기
///
/// 상태 없음: 봉인마다 OS RNG에서 nonce를 새로 뽑으므로
/// 같은 청크도 매번 다른 암호문이 됨
#[derive(Clone)]
pub struct FrameCipher {
    cipher: ChaCha20Poly1305,
}

impl FrameCipher {
    /// 세션 키로 암호화기 생성
    pub fn new(key: &SessionKey) -> Result<Self, CryptoError> {
        let cipher = ChaCha20Poly1305::new_from_slice(&key.cipher_key())
            .map_err(|_| CryptoError::InvalidKeySize)?;
        Ok(Self { cipher })
    }

    /// 봉인
    /// 반환: nonce(12) + ciphertext(원본 + 16바이트 태그)
    pub fn seal(&self, aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, Payload { msg: plaintext, aad })
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

        let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        result.extend_from_slice(&nonce_bytes);
        result.extend_from_slice(&ciphertext);
        Ok(result)
    }

    /// 개봉
    /// 입력: nonce(12) + ciphertext
    pub fn open(&self, aad: &[u8], sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if sealed.len() < SEAL_OVERHEAD {
            return Err(CryptoError::DecryptionFailed("데이터가 너무 짧음".into()));
        }

        let nonce = Nonce::from_slice(&sealed[..NONCE_SIZE]);
        let ciphertext = &sealed[NONCE_SIZE..];

        self.cipher
            .decrypt(nonce, Payload { msg: ciphertext, aad })
            .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
    }
}

impl fmt::Debug for FrameCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FrameCipher { .. }")
    }
}

/// 평문 체크섬 접두사 (BLAKE3 hex 앞 `len` 글자)
pub fn checksum_prefix(data: &[u8], len: usize) -> String {
    let digest = blake3::hash(data);
    let hex = digest.to_hex();
    let hex = hex.as_str();
    hex[..len.min(hex.len())].to_string()
}
