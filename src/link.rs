//! 링크 추상화
//!
//! 프로토콜 코어는 양방향 바이트 채널만 요구함:
//! 읽기, 쓰기, flush, 닫기(shutdown).
//! 시리얼 포트 설정이나 장치 탐색은 호출자 책임.
//!
//! `AsyncRead + AsyncWrite`를 구현하는 모든 타입이 링크가 될 수 있음
//! (`tokio::io::DuplexStream`, `TcpStream`, 시리얼 어댑터 등)

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, DuplexStream};

/// 양방향 바이트 링크
pub trait Link: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> Link for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// 메모리 링크 쌍 생성 (테스트/루프백용)
///
/// 한쪽에 쓴 바이트가 다른 쪽에서 읽힘
pub fn memory_pair(capacity: usize) -> (DuplexStream, DuplexStream) {
    tokio::io::duplex(capacity)
}

/// 바이트 쓰기 + flush
pub async fn write_all_flush<L: Link + ?Sized>(link: &mut L, bytes: &[u8]) -> std::io::Result<()> {
    link.write_all(bytes).await?;
    link.flush().await
}

/// 링크 닫기
///
/// 이미 닫힌 링크는 에러로 보지 않음
pub async fn close<L: Link + ?Sized>(link: &mut L) -> std::io::Result<()> {
    match link.shutdown().await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotConnected => Ok(()),
        Err(e) => Err(e),
    }
}
