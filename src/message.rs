//! 제어 메시지 정의
//!
//! 역방향(수신자 → 송신자) 메시지는 ACK 한 종류뿐.
//! 패딩 없는 ASCII 한 줄: `ACK<seq>\n`

use std::fmt;

/// ACK 접두사
pub const ACK_PREFIX: &str = "ACK";

/// 줄 구분자
pub const LINE_TERMINATOR: u8 = b'\n';

/// ACK 메시지
///
/// `ACK0`은 세션 시작 신호 (송신자는 이걸 받아야 1번 청크를 보냄)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AckMessage {
    pub seq: u32,
}

impl AckMessage {
    pub fn new(seq: u32) -> Self {
        Self { seq }
    }

    /// 세션 시작 ACK
    pub fn start() -> Self {
        Self { seq: 0 }
    }

    pub fn is_start(&self) -> bool {
        self.seq == 0
    }

    /// 줄 바이트로 직렬화 (구분자 포함)
    pub fn to_line(&self) -> Vec<u8> {
        let mut line = self.to_string().into_bytes();
        line.push(LINE_TERMINATOR);
        line
    }

    /// 한 줄에서 파싱 (앞뒤 공백/CR 허용)
    ///
    /// `ACK` 뒤에 십진수만 있어야 함. `ACK+1`, `ACK 1` 등은 거부
    pub fn parse(line: &str) -> Option<Self> {
        let digits = line.trim().strip_prefix(ACK_PREFIX)?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok().map(Self::new)
    }
}

impl fmt::Display for AckMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", ACK_PREFIX, self.seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ack_line() {
        assert_eq!(AckMessage::start().to_line(), b"ACK0\n");
        assert_eq!(AckMessage::new(12).to_line(), b"ACK12\n");
        assert_eq!(AckMessage::new(3).to_string(), "ACK3");
    }

    #[test]
    fn test_ack_parse() {
        assert_eq!(AckMessage::parse("ACK0"), Some(AckMessage::start()));
        assert_eq!(AckMessage::parse("ACK42\r\n"), Some(AckMessage::new(42)));
        assert!(AckMessage::parse("ACK0").unwrap().is_start());

        assert_eq!(AckMessage::parse("ACK"), None);
        assert_eq!(AckMessage::parse("ACK+1"), None);
        assert_eq!(AckMessage::parse("ack1"), None);
        assert_eq!(AckMessage::parse("NAK1"), None);
        assert_eq!(AckMessage::parse("ACK99999999999"), None);
    }
}
