//! 수신자
//!
//! - ACK0으로 세션 시작 (첫 프레임 수락 전까지 주기적으로 반복)
//! - 고정 크기 프레임 수신 및 검증
//! - 순서가 맞는 프레임만 싱크에 기록하고 ACK
//! - 검증 실패/순서 불일치는 조용히 폐기 (NACK 없음, 송신자 타임아웃에 맡김)
//! - FIN 수신 시 flush 후 링크 닫기

use std::path::Path;

use tokio::fs::OpenOptions;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::crypto::SessionKey;
use crate::frame::{DecodedFrame, FrameCodec, FrameLayout, SeqField};
use crate::link::{self, Link};
use crate::message::AckMessage;
use crate::stats::TransferStats;
use crate::{Config, Error, Result};

/// 프레임 처리 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    /// 수락 후 계속
    Accepted,
    /// 폐기 후 계속
    Dropped,
    /// FIN 수락, 세션 종료
    Finished,
}

/// 수신 세션
///
/// 링크, 코덱(세션 키), 마지막 수락 시퀀스를 소유함
pub struct Receiver<L: Link> {
    /// 링크
    link: L,

    /// 프레임 코덱
    codec: FrameCodec,

    /// 설정
    config: Config,

    /// 전송 통계
    stats: TransferStats,

    /// 마지막으로 수락한 시퀀스 (0 = 아직 없음)
    last_accepted: u32,

    /// 연속 무결성 실패 수
    consecutive_rejects: u32,

    /// 마지막으로 폐기한 프레임이 FIN이었는지
    rejected_fin: bool,

    /// 프레임 버퍼와 채워진 길이 (타임아웃으로 깨어나도 유지)
    frame_buf: Vec<u8>,
    filled: usize,

    /// 마지막 바이트 수신 시각
    last_activity: Instant,

    /// 다음 ACK0 재전송 시각
    next_start_ack: Option<Instant>,
}

impl<L: Link> Receiver<L> {
    /// 새 수신자 생성
    pub fn new(link: L, key: &SessionKey, config: Config) -> Result<Self> {
        config.validate()?;
        let layout = FrameLayout::from_config(&config);
        let codec = FrameCodec::new(key, layout)?;

        Ok(Self {
            link,
            frame_buf: vec![0u8; layout.frame_len()],
            codec,
            config,
            stats: TransferStats::new(),
            last_accepted: 0,
            consecutive_rejects: 0,
            rejected_fin: false,
            filled: 0,
            last_activity: Instant::now(),
            next_start_ack: None,
        })
    }

    /// FIN까지 수신하며 검증된 페이로드를 `sink`에 기록
    pub async fn receive<W>(&mut self, sink: &mut W) -> Result<TransferStats>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        self.reset();

        if let Err(e) = self.run(sink).await {
            warn!("수신 실패: {}", e);
            let _ = link::close(&mut self.link).await;
            return Err(e);
        }

        self.stats.finish();
        info!("수신 완료: {}", self.stats.summary());
        Ok(self.stats.clone())
    }

    /// 파일에 이어 쓰기로 수신 (없으면 생성)
    pub async fn receive_to_file(&mut self, path: impl AsRef<Path>) -> Result<TransferStats> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())
            .await?;

        let stats = self.receive(&mut file).await?;
        file.sync_all().await?;
        Ok(stats)
    }

    /// 현재 통계
    pub fn stats(&self) -> &TransferStats {
        &self.stats
    }

    /// 마지막으로 수락한 시퀀스
    pub fn last_accepted(&self) -> u32 {
        self.last_accepted
    }

    /// 링크 반환
    pub fn into_inner(self) -> L {
        self.link
    }

    fn reset(&mut self) {
        let now = Instant::now();
        self.stats = TransferStats::new();
        self.last_accepted = 0;
        self.consecutive_rejects = 0;
        self.rejected_fin = false;
        self.filled = 0;
        self.last_activity = now;
        self.next_start_ack = self.config.start_ack_interval().map(|t| now + t);
    }

    async fn run<W>(&mut self, sink: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        self.send_ack(AckMessage::start()).await?;
        debug!("ACK0 전송, 프레임 대기 ({} bytes/frame)", self.codec.frame_len());

        loop {
            if !self.read_frame().await? {
                if self.rejected_fin {
                    return Err(Error::IntegrityFailure { seq: SeqField::Fin });
                }
                return Err(Error::ConnectionClosed);
            }

            let decoded = match self.codec.decode(&self.frame_buf) {
                Ok(decoded) => decoded,
                Err(e @ (Error::Framing { .. } | Error::InvalidSequenceField(_))) => {
                    warn!("프레임 폐기: {}", e);
                    self.stats.framing_errors += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };

            if self.handle_frame(decoded, sink).await? == Verdict::Finished {
                sink.flush().await?;
                link::close(&mut self.link).await?;
                return Ok(());
            }
        }
    }

    /// 검증된 프레임 처리
    async fn handle_frame<W>(&mut self, frame: DecodedFrame, sink: &mut W) -> Result<Verdict>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        if !frame.checksum_ok {
            self.stats.frames_rejected += 1;
            self.consecutive_rejects += 1;
            self.rejected_fin = frame.seq.is_fin();
            debug!("무결성 검증 실패, 폐기: seq={}", frame.seq);

            if let Some(max) = self.config.max_consecutive_rejects {
                if self.consecutive_rejects > max {
                    return Err(Error::IntegrityFailure { seq: frame.seq });
                }
            }
            return Ok(Verdict::Dropped);
        }

        self.consecutive_rejects = 0;
        self.rejected_fin = false;

        match frame.seq {
            SeqField::Fin => {
                self.deliver(&frame, sink).await?;
                debug!("FIN 수신 (last_accepted={})", self.last_accepted);
                Ok(Verdict::Finished)
            }
            SeqField::Data(seq) if Some(seq) == self.last_accepted.checked_add(1) => {
                self.deliver(&frame, sink).await?;
                self.last_accepted = seq;
                self.send_ack(AckMessage::new(seq)).await?;
                Ok(Verdict::Accepted)
            }
            SeqField::Data(seq) if seq != 0 && seq == self.last_accepted => {
                // ACK가 유실되어 송신자가 재전송한 경우
                self.stats.duplicates += 1;
                if self.config.reack_duplicates {
                    debug!("중복 프레임 seq={}, ACK 재전송", seq);
                    self.send_ack(AckMessage::new(seq)).await?;
                }
                Ok(Verdict::Dropped)
            }
            SeqField::Data(seq) => {
                self.stats.out_of_order += 1;
                debug!(
                    "순서 불일치 폐기: seq={}, expected={}",
                    seq,
                    self.last_accepted as u64 + 1
                );
                Ok(Verdict::Dropped)
            }
        }
    }

    async fn deliver<W>(&mut self, frame: &DecodedFrame, sink: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        sink.write_all(&frame.payload).await?;
        self.stats.frames_accepted += 1;
        self.stats.payload_bytes += frame.payload.len() as u64;
        if !frame.seq.is_fin() {
            self.stats.data_frames += 1;
        }
        Ok(())
    }

    /// 프레임 하나를 `frame_buf`에 채움. EOF면 false
    ///
    /// 대기 중에 ACK0 재전송과 유휴 타임아웃을 처리
    async fn read_frame(&mut self) -> Result<bool> {
        let frame_len = self.frame_buf.len();

        loop {
            let idle_at = self.config.idle_timeout().map(|t| self.last_activity + t);
            let start_ack_at = if self.last_accepted == 0 {
                self.next_start_ack
            } else {
                None
            };
            let wake_at = match (idle_at, start_ack_at) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };

            let read = self.link.read(&mut self.frame_buf[self.filled..]);
            let result = match wake_at {
                Some(at) => timeout_at(at, read).await.ok(),
                None => Some(read.await),
            };
            let n = match result {
                Some(result) => result?,
                None => {
                    self.on_wake(idle_at).await?;
                    continue;
                }
            };

            if n == 0 {
                if self.filled > 0 {
                    warn!(
                        "프레임 도중 EOF: {}/{} bytes",
                        self.filled, frame_len
                    );
                    self.stats.framing_errors += 1;
                }
                return Ok(false);
            }

            self.last_activity = Instant::now();
            self.filled += n;
            if self.filled == frame_len {
                self.filled = 0;
                return Ok(true);
            }
        }
    }

    /// 대기 타이머 만료 처리
    async fn on_wake(&mut self, idle_at: Option<Instant>) -> Result<()> {
        let now = Instant::now();
        if idle_at.map_or(false, |at| now >= at) {
            return Err(Error::IdleTimeout);
        }

        if let (Some(at), Some(interval)) = (self.next_start_ack, self.config.start_ack_interval()) {
            if now >= at {
                debug!("첫 프레임 없음, ACK0 재전송");
                self.send_ack(AckMessage::start()).await?;
                self.next_start_ack = Some(now + interval);
            }
        }
        Ok(())
    }

    async fn send_ack(&mut self, ack: AckMessage) -> Result<()> {
        link::write_all_flush(&mut self.link, &ack.to_line()).await?;
        self.stats.acks_sent += 1;
        Ok(())
    }
}

/// 기본 설정으로 수신하여 `output_path`에 이어 씀
pub async fn receive<L: Link>(
    link: L,
    key: &str,
    output_path: impl AsRef<Path>,
) -> Result<TransferStats> {
    let key = SessionKey::new(key)?;
    let mut receiver = Receiver::new(link, &key, Config::default())?;
    receiver.receive_to_file(output_path).await
}
