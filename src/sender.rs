//! 송신자
//!
//! - ACK0 핸드쉐이크 대기
//! - 청크별 stop-and-wait: 전송 → ACK 대기 → 타임아웃 시 같은 프레임 재전송
//! - 마지막에 FIN 프레임 전송 후 링크 닫기 (FIN에 대한 ACK는 기다리지 않음)
//!
//! 모든 대기는 단조 시계 데드라인(`tokio::time::timeout_at`)으로 처리.
//! 프레임 쓰기도 같음: 링크가 막혀 쓰기가 ACK 타임아웃 안에 끝나지 않으면
//! 실패한 시도로 세고 다음 시도에서 남은 바이트부터 이어 씀

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::crypto::SessionKey;
use crate::frame::{chunk_count, Frame, FrameCodec, FrameLayout, SeqField};
use crate::link::{self, Link};
use crate::message::{AckMessage, LINE_TERMINATOR};
use crate::stats::TransferStats;
use crate::{Config, Error, Result};

/// ACK 줄 최대 길이 (`ACK` + 10자리 + 여유)
/// 구분자 없이 이보다 길어지면 잡음으로 보고 버림
pub const MAX_LINE_LEN: usize = 32;

/// 송신 세션
///
/// 링크, 코덱(세션 키), 카운터를 소유함
pub struct Sender<L: Link> {
    /// 링크 (ACK 줄 읽기용 버퍼 포함)
    link: BufReader<L>,

    /// 프레임 코덱
    codec: FrameCodec,

    /// 설정
    config: Config,

    /// 전송 통계
    stats: TransferStats,

    /// 읽다 만 줄 (타임아웃으로 깨어나도 유지)
    line_buf: Vec<u8>,

    /// 너무 긴 줄을 버리는 중 (다음 구분자까지 무시)
    skip_line: bool,

    /// 세션 전체 데드라인
    deadline: Option<Instant>,
}

impl<L: Link> Sender<L> {
    /// 새 송신자 생성
    pub fn new(link: L, key: &SessionKey, config: Config) -> Result<Self> {
        config.validate()?;
        let codec = FrameCodec::new(key, FrameLayout::from_config(&config))?;

        Ok(Self {
            link: BufReader::new(link),
            codec,
            config,
            stats: TransferStats::new(),
            line_buf: Vec::with_capacity(MAX_LINE_LEN),
            skip_line: false,
            deadline: None,
        })
    }

    /// 페이로드 전송
    ///
    /// 성공하면 링크가 닫힌 상태. 실패해도 링크는 닫음
    pub async fn send(&mut self, payload: &[u8]) -> Result<TransferStats> {
        let total_chunks = chunk_count(payload.len(), self.config.chunk_size);
        if total_chunks > u32::MAX as usize {
            return Err(Error::PayloadTooLarge {
                chunks: total_chunks,
            });
        }

        self.stats = TransferStats::new();
        self.line_buf.clear();
        self.skip_line = false;
        self.deadline = self.config.session_timeout().map(|t| Instant::now() + t);

        if let Err(e) = self.run(payload, total_chunks).await {
            warn!("전송 실패: {}", e);
            // 막힌 링크에서는 닫기도 끝나지 않을 수 있음
            let _ = timeout(self.config.ack_timeout(), link::close(self.link.get_mut())).await;
            return Err(e);
        }

        self.stats.finish();
        info!("전송 완료: {}", self.stats.summary());
        Ok(self.stats.clone())
    }

    /// 현재 통계
    pub fn stats(&self) -> &TransferStats {
        &self.stats
    }

    /// 링크 반환
    pub fn into_inner(self) -> L {
        self.link.into_inner()
    }

    async fn run(&mut self, payload: &[u8], total_chunks: usize) -> Result<()> {
        self.await_start_ack().await?;
        info!(
            "ACK0 수신, 전송 시작: {} bytes, {} 청크",
            payload.len(),
            total_chunks
        );

        for (idx, chunk) in payload.chunks(self.config.chunk_size).enumerate() {
            let seq = idx as u32 + 1;
            let frame = self.codec.encode(chunk, SeqField::Data(seq))?;
            self.transmit_until_acked(&frame, seq).await?;

            self.stats.data_frames += 1;
            self.stats.payload_bytes += chunk.len() as u64;
        }

        // FIN은 빈 청크를 실어 보냄
        let fin = self.codec.encode(&[], SeqField::Fin)?;
        self.write_fin(&fin).await?;
        debug!("FIN 전송");

        match timeout(self.config.ack_timeout(), link::close(self.link.get_mut())).await {
            Ok(result) => result?,
            Err(_) => warn!("링크 닫기 지연, 무시"),
        }
        Ok(())
    }

    /// ACK0 대기
    async fn await_start_ack(&mut self) -> Result<()> {
        let until = self
            .config
            .handshake_timeout()
            .map(|t| Instant::now() + t);

        loop {
            let line = match self.read_line(until).await? {
                Some(line) => line,
                None => return Err(Error::HandshakeTimeout),
            };

            match AckMessage::parse(&line) {
                Some(ack) if ack.is_start() => {
                    self.stats.acks_received += 1;
                    return Ok(());
                }
                _ => debug!("핸드쉐이크 중 무시: {:?}", line),
            }
        }
    }

    /// 프레임 하나를 ACK 받을 때까지 전송
    ///
    /// 재전송은 항상 같은 바이트열. 재전송 예산을 다 쓰면 `SessionTimedOut`.
    /// 쓰기가 ACK 타임아웃 안에 끝나지 않은 시도도 실패로 셈
    async fn transmit_until_acked(&mut self, frame: &Frame, seq: u32) -> Result<()> {
        let ack_timeout = self.config.ack_timeout();
        let mut attempts = 0u32;
        let mut written = 0usize;

        loop {
            attempts += 1;
            if attempts > 1 {
                self.stats.retransmissions += 1;
            }

            let attempt_deadline = Instant::now() + ack_timeout;
            let complete = self
                .write_frame(frame.as_bytes(), &mut written, attempt_deadline)
                .await?;

            if !complete {
                debug!("seq={}: 링크 막힘, {}/{} bytes 전송", seq, written, frame.len());
            } else if self.await_ack(seq, attempt_deadline).await? {
                debug!("ACK{} 수신 ({}회 전송)", seq, attempts);
                return Ok(());
            }

            if self.budget_exhausted(attempts) {
                warn!("seq={}: {}회 전송 후 포기", seq, attempts);
                return Err(Error::SessionTimedOut { seq, attempts });
            }

            debug!(
                "ACK{} 타임아웃 ({}ms), 재전송 #{}",
                seq, self.config.ack_timeout_ms, attempts
            );
        }
    }

    /// FIN 쓰기. ACK는 없지만 쓰기 정체는 같은 예산으로 제한
    async fn write_fin(&mut self, fin: &Frame) -> Result<()> {
        let ack_timeout = self.config.ack_timeout();
        let mut attempts = 0u32;
        let mut written = 0usize;

        loop {
            attempts += 1;
            let until = Instant::now() + ack_timeout;
            if self.write_frame(fin.as_bytes(), &mut written, until).await? {
                return Ok(());
            }
            if self.budget_exhausted(attempts) {
                warn!("FIN: {}회 시도 후 포기", attempts);
                return Err(Error::FinStalled { attempts });
            }
        }
    }

    fn budget_exhausted(&self, attempts: u32) -> bool {
        self.config
            .max_retransmissions
            .map_or(false, |max| attempts > max)
    }

    /// `ACK<seq>` 대기. 데드라인까지 오지 않으면 false
    ///
    /// 다른 ACK(지연된 이전 ACK, 반복된 ACK0)는 무시하고 계속 대기
    async fn await_ack(&mut self, seq: u32, until: Instant) -> Result<bool> {
        loop {
            let line = match self.read_line(Some(until)).await? {
                Some(line) => line,
                None => return Ok(false),
            };

            match AckMessage::parse(&line) {
                Some(ack) if ack.seq == seq => {
                    self.stats.acks_received += 1;
                    return Ok(true);
                }
                Some(ack) => {
                    self.stats.stale_acks += 1;
                    debug!("기대하지 않은 {} (대기 중: ACK{})", ack, seq);
                }
                None => debug!("알 수 없는 줄 무시: {:?}", line),
            }
        }
    }

    /// 한 줄 읽기
    ///
    /// `until`(또는 세션 데드라인)까지 줄이 완성되지 않으면 None.
    /// 세션 데드라인이 지나면 `DeadlineExceeded`.
    /// `MAX_LINE_LEN`을 넘는 줄은 버리고 지연 ACK로 셈
    async fn read_line(&mut self, until: Option<Instant>) -> Result<Option<String>> {
        let wake_at = self.wake_at(until);

        loop {
            let remaining = MAX_LINE_LEN.saturating_sub(self.line_buf.len()).max(1) as u64;
            let result = {
                let mut limited = (&mut self.link).take(remaining);
                let read = limited.read_until(LINE_TERMINATOR, &mut self.line_buf);
                match wake_at {
                    Some(at) => timeout_at(at, read).await.ok(),
                    None => Some(read.await),
                }
            };
            let n = match result {
                Some(result) => result?,
                None => return self.on_timeout().map(|_| None),
            };

            if n == 0 {
                return Err(Error::ConnectionClosed);
            }

            if self.line_buf.last() != Some(&LINE_TERMINATOR) {
                if self.line_buf.len() >= MAX_LINE_LEN {
                    if !self.skip_line {
                        debug!("구분자 없는 긴 줄 폐기 ({}+ bytes)", self.line_buf.len());
                        self.stats.stale_acks += 1;
                        self.skip_line = true;
                    }
                    self.line_buf.clear();
                }
                // 줄 미완성: 계속 읽음 (EOF면 다음 읽기가 0)
                continue;
            }

            let line = String::from_utf8_lossy(&self.line_buf).trim().to_string();
            self.line_buf.clear();
            if self.skip_line {
                // 버린 줄의 꼬리
                self.skip_line = false;
                continue;
            }
            return Ok(Some(line));
        }
    }

    /// 프레임 바이트를 `written` 위치부터 이어 씀
    ///
    /// 다 쓰고 flush까지 끝나면 true (`written`은 0으로 되돌림).
    /// `until`까지 끝나지 않으면 false, 쓴 위치는 `written`에 남음.
    /// 세션 데드라인이 지나면 `DeadlineExceeded`
    async fn write_frame(&mut self, bytes: &[u8], written: &mut usize, until: Instant) -> Result<bool> {
        let wake_at = self.wake_at(Some(until)).unwrap_or(until);

        while *written < bytes.len() {
            // `write`는 취소 안전: 타임아웃으로 취소되면 아무것도 쓰지 않은 것
            let write = self.link.get_mut().write(&bytes[*written..]);
            let result = timeout_at(wake_at, write).await.ok();
            match result {
                Some(Ok(0)) => return Err(std::io::Error::from(std::io::ErrorKind::WriteZero).into()),
                Some(Ok(n)) => *written += n,
                Some(Err(e)) => return Err(e.into()),
                None => return self.on_timeout().map(|_| false),
            }
        }

        let flushed = timeout_at(wake_at, self.link.get_mut().flush()).await.ok();
        match flushed {
            Some(result) => result?,
            None => return self.on_timeout().map(|_| false),
        }

        *written = 0;
        self.stats.frames_sent += 1;
        Ok(true)
    }

    /// 대기 데드라인 (`until`과 세션 데드라인 중 이른 쪽)
    fn wake_at(&self, until: Option<Instant>) -> Option<Instant> {
        match (until, self.deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// 대기 타임아웃 처리: 세션 데드라인이 지났으면 에러
    fn on_timeout(&self) -> Result<()> {
        if self.deadline.map_or(false, |d| Instant::now() >= d) {
            return Err(Error::DeadlineExceeded);
        }
        Ok(())
    }
}

/// 기본 설정으로 페이로드 전송
///
/// `link`는 이미 열려 있고 수신자와 연결되어 있어야 함
pub async fn send<L: Link>(payload: &[u8], link: L, key: &str) -> Result<TransferStats> {
    let key = SessionKey::new(key)?;
    let mut sender = Sender::new(link, &key, Config::default())?;
    sender.send(payload).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::memory_pair;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn fast_config() -> Config {
        Config {
            ack_timeout_ms: 30,
            max_retransmissions: Some(3),
            handshake_timeout_ms: Some(200),
            ..Config::default()
        }
    }

    fn codec() -> FrameCodec {
        FrameCodec::new(&SessionKey::new("k").unwrap(), FrameLayout::default()).unwrap()
    }

    async fn read_frame<R: tokio::io::AsyncRead + Unpin>(peer: &mut R, codec: &FrameCodec) -> Vec<u8> {
        let mut buf = vec![0u8; codec.frame_len()];
        peer.read_exact(&mut buf).await.unwrap();
        buf
    }

    #[tokio::test]
    async fn test_handshake_timeout() {
        let (link, _peer) = memory_pair(4096);
        let key = SessionKey::new("k").unwrap();
        let mut sender = Sender::new(link, &key, fast_config()).unwrap();

        let err = sender.send(b"data").await.unwrap_err();
        assert!(matches!(err, Error::HandshakeTimeout));
        assert_eq!(sender.stats().frames_sent, 0);
    }

    #[tokio::test]
    async fn test_waits_for_exact_ack0() {
        let (link, mut peer) = memory_pair(4096);
        let key = SessionKey::new("k").unwrap();
        let mut sender = Sender::new(link, &key, fast_config()).unwrap();

        let peer_task = tokio::spawn(async move {
            // ACK0 이전의 잡음은 무시되어야 함
            peer.write_all(b"hello\nACK1\nACK0\n").await.unwrap();
            let codec = codec();

            let frame = read_frame(&mut peer, &codec).await;
            let decoded = codec.decode(&frame).unwrap();
            assert_eq!(decoded.seq, SeqField::Data(1));
            peer.write_all(b"ACK1\n").await.unwrap();

            let fin = read_frame(&mut peer, &codec).await;
            assert!(codec.decode(&fin).unwrap().seq.is_fin());
        });

        let stats = sender.send(b"one chunk").await.unwrap();
        peer_task.await.unwrap();

        assert_eq!(stats.data_frames, 1);
        assert_eq!(stats.frames_sent, 2);
        assert_eq!(stats.retransmissions, 0);
    }

    #[tokio::test]
    async fn test_retransmits_identical_frame_then_gives_up() {
        let (link, mut peer) = memory_pair(1 << 16);
        let key = SessionKey::new("k").unwrap();
        let mut sender = Sender::new(link, &key, fast_config()).unwrap();

        let peer_task = tokio::spawn(async move {
            peer.write_all(b"ACK0\n").await.unwrap();
            let codec = codec();
            let mut frames = Vec::new();
            // 최초 1회 + 재전송 3회
            for _ in 0..4 {
                frames.push(read_frame(&mut peer, &codec).await);
            }
            (frames, peer)
        });

        let err = sender.send(b"nobody acks this").await.unwrap_err();
        assert!(matches!(err, Error::SessionTimedOut { seq: 1, attempts: 4 }));
        assert_eq!(sender.stats().retransmissions, 3);

        let (frames, _peer) = peer_task.await.unwrap();
        assert!(frames.windows(2).all(|w| w[0] == w[1]));
    }

    #[tokio::test]
    async fn test_stale_ack_does_not_complete_frame() {
        let (link, mut peer) = memory_pair(1 << 16);
        let key = SessionKey::new("k").unwrap();
        let config = Config {
            ack_timeout_ms: 100,
            max_retransmissions: Some(0),
            ..fast_config()
        };
        let mut sender = Sender::new(link, &key, config).unwrap();

        let peer_task = tokio::spawn(async move {
            peer.write_all(b"ACK0\n").await.unwrap();
            let codec = codec();
            read_frame(&mut peer, &codec).await;
            // 잘못된 번호의 ACK
            peer.write_all(b"ACK7\nACK0\n").await.unwrap();
            peer
        });

        let err = sender.send(b"x").await.unwrap_err();
        assert!(matches!(err, Error::SessionTimedOut { seq: 1, attempts: 1 }));
        assert_eq!(sender.stats().stale_acks, 2);
        drop(peer_task.await.unwrap());
    }

    #[tokio::test]
    async fn test_session_deadline() {
        let (link, mut peer) = memory_pair(1 << 16);
        let key = SessionKey::new("k").unwrap();
        let config = Config {
            ack_timeout_ms: 20,
            max_retransmissions: None,
            session_timeout_ms: Some(150),
            ..Config::default()
        };
        let mut sender = Sender::new(link, &key, config).unwrap();

        // 프레임을 읽기만 하고 ACK는 보내지 않는 피어
        let peer_task = tokio::spawn(async move {
            peer.write_all(b"ACK0\n").await.unwrap();
            let mut sink = Vec::new();
            let _ = peer.read_to_end(&mut sink).await;
        });

        let err = sender.send(b"unbounded retries").await.unwrap_err();
        assert!(matches!(err, Error::DeadlineExceeded));
        assert!(sender.stats().retransmissions >= 2);
        peer_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_peer_close_is_connection_closed() {
        let (link, mut peer) = memory_pair(4096);
        let key = SessionKey::new("k").unwrap();
        let mut sender = Sender::new(link, &key, fast_config()).unwrap();

        peer.write_all(b"ACK0\n").await.unwrap();
        drop(peer);

        let err = sender.send(b"data").await.unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed | Error::Io(_)));
    }

    #[tokio::test]
    async fn test_blocked_link_exhausts_retry_budget() {
        // 프레임 하나(130 bytes)와 조금만 들어가는 버퍼, ACK0 이후 읽지 않는 피어
        let (link, mut peer) = memory_pair(200);
        let key = SessionKey::new("k").unwrap();
        let config = Config {
            ack_timeout_ms: 20,
            max_retransmissions: Some(2),
            session_timeout_ms: Some(5_000),
            ..fast_config()
        };
        let mut sender = Sender::new(link, &key, config).unwrap();
        peer.write_all(b"ACK0\n").await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(3), sender.send(&[0x5A; 400]))
            .await
            .expect("sender blocked on a full link");

        assert!(matches!(
            result,
            Err(Error::SessionTimedOut { seq: 1, attempts: 3 })
        ));
        assert_eq!(sender.stats().retransmissions, 2);
        // 첫 프레임만 끝까지 써짐
        assert_eq!(sender.stats().frames_sent, 1);
        drop(peer);
    }

    #[tokio::test]
    async fn test_blocked_link_hits_session_deadline() {
        let (link, mut peer) = memory_pair(200);
        let key = SessionKey::new("k").unwrap();
        let config = Config {
            ack_timeout_ms: 20,
            max_retransmissions: None,
            session_timeout_ms: Some(200),
            ..fast_config()
        };
        let mut sender = Sender::new(link, &key, config).unwrap();
        peer.write_all(b"ACK0\n").await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(3), sender.send(&[0x5A; 400]))
            .await
            .expect("sender blocked on a full link");

        assert!(matches!(result, Err(Error::DeadlineExceeded)));
        drop(peer);
    }

    #[tokio::test]
    async fn test_stalled_write_resumes_where_it_stopped() {
        // 버퍼가 프레임보다 작아 한 번에 다 쓸 수 없음: 이어 쓴 바이트열이 프레임 하나와 같아야 함
        let (link, mut peer) = memory_pair(100);
        let key = SessionKey::new("k").unwrap();
        let config = Config {
            ack_timeout_ms: 50,
            max_retransmissions: Some(10),
            ..fast_config()
        };
        let mut sender = Sender::new(link, &key, config).unwrap();
        peer.write_all(b"ACK0\n").await.unwrap();

        let peer_task = tokio::spawn(async move {
            let codec = codec();
            // 쓰기가 한 번 이상 타임아웃되도록 늦게 읽기 시작
            tokio::time::sleep(Duration::from_millis(120)).await;
            let frame = read_frame(&mut peer, &codec).await;
            let decoded = codec.decode(&frame).unwrap();
            assert!(decoded.checksum_ok);
            assert_eq!(decoded.payload.as_ref(), b"slow reader");
            peer.write_all(b"ACK1\n").await.unwrap();

            // ACK가 늦으면 같은 프레임이 더 올 수 있음
            loop {
                let next = read_frame(&mut peer, &codec).await;
                let decoded = codec.decode(&next).unwrap();
                assert!(decoded.checksum_ok);
                if decoded.seq.is_fin() {
                    break;
                }
            }
        });

        let stats = sender.send(b"slow reader").await.unwrap();
        peer_task.await.unwrap();

        assert!(stats.retransmissions >= 1);
        assert!(stats.frames_sent >= 2);
    }

    #[tokio::test]
    async fn test_overlong_line_is_discarded() {
        let (link, mut peer) = memory_pair(1 << 16);
        let key = SessionKey::new("k").unwrap();
        let config = Config {
            ack_timeout_ms: 1_000,
            ..fast_config()
        };
        let mut sender = Sender::new(link, &key, config).unwrap();

        let peer_task = tokio::spawn(async move {
            peer.write_all(b"ACK0\n").await.unwrap();
            let codec = codec();
            read_frame(&mut peer, &codec).await;

            // 구분자 없는 잡음 뒤에 정상 ACK. 잡음의 꼬리가 ACK로 읽히면 안 됨
            let mut noise = vec![b'7'; 200];
            noise.extend_from_slice(b"ACK1\nACK1\n");
            peer.write_all(&noise).await.unwrap();

            let fin = read_frame(&mut peer, &codec).await;
            assert!(codec.decode(&fin).unwrap().seq.is_fin());
        });

        let stats = sender.send(b"noisy line").await.unwrap();
        peer_task.await.unwrap();

        assert_eq!(stats.data_frames, 1);
        // 버린 긴 줄 1개, 그 꼬리("7..7ACK1")는 조용히 무시
        assert_eq!(stats.stale_acks, 1);
        assert!(sender.line_buf.capacity() <= MAX_LINE_LEN * 2);
    }

    #[tokio::test]
    async fn test_empty_key_rejected() {
        let (link, _peer) = memory_pair(64);
        let err = send(b"x", link, "").await.unwrap_err();
        assert!(matches!(err, Error::EmptyKey));
    }
}
