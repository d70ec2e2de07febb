//! 전송 통계

use std::time::{Duration, Instant};

/// 세션 전송 통계
///
/// 송신자와 수신자가 같은 구조를 쓰며 각자 해당하는 카운터만 채움
#[derive(Debug, Clone)]
pub struct TransferStats {
    /// 시작 시간
    pub start_time: Instant,

    /// 종료 시간 (세션 완료 시 설정)
    pub end_time: Option<Instant>,

    /// 데이터 프레임 수 (재전송 제외, FIN 제외)
    pub data_frames: u64,

    /// 총 전송 프레임 수 (재전송 + FIN 포함)
    pub frames_sent: u64,

    /// 재전송 프레임 수
    pub retransmissions: u64,

    /// 수신한 유효 ACK 수 (ACK0 포함)
    pub acks_received: u64,

    /// 기대하지 않은 ACK 수 (지연 도착, 중복)
    pub stale_acks: u64,

    /// 송신한 ACK 수 (ACK0, 재ACK 포함)
    pub acks_sent: u64,

    /// 수락한 프레임 수 (FIN 포함)
    pub frames_accepted: u64,

    /// 무결성 검증 실패 프레임 수
    pub frames_rejected: u64,

    /// 순서가 맞지 않아 버린 프레임 수
    pub out_of_order: u64,

    /// 이미 수락한 프레임의 중복 수신 수
    pub duplicates: u64,

    /// 프레이밍 에러 수
    pub framing_errors: u64,

    /// 페이로드 바이트 (송신: 전송 완료, 수신: 싱크에 기록)
    pub payload_bytes: u64,
}

impl TransferStats {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            end_time: None,
            data_frames: 0,
            frames_sent: 0,
            retransmissions: 0,
            acks_received: 0,
            stale_acks: 0,
            acks_sent: 0,
            frames_accepted: 0,
            frames_rejected: 0,
            out_of_order: 0,
            duplicates: 0,
            framing_errors: 0,
            payload_bytes: 0,
        }
    }

    /// 세션 종료 기록
    pub fn finish(&mut self) {
        self.end_time = Some(Instant::now());
    }

    /// 경과 시간
    pub fn elapsed(&self) -> Duration {
        match self.end_time {
            Some(end) => end.duration_since(self.start_time),
            None => self.start_time.elapsed(),
        }
    }

    /// 페이로드 처리율 (bytes/sec)
    pub fn throughput(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            return 0.0;
        }
        self.payload_bytes as f64 / elapsed
    }

    /// 재전송 비율 (재전송 / 데이터 프레임)
    pub fn retransmit_ratio(&self) -> f64 {
        if self.data_frames == 0 {
            return 0.0;
        }
        self.retransmissions as f64 / self.data_frames as f64
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "Elapsed: {:.2}s | Bytes: {} | Frames: {} sent, {} accepted | Retransmits: {} ({:.1}%) | Rejected: {} | Out-of-order: {} | Dup: {} | Throughput: {:.1} B/s",
            self.elapsed().as_secs_f64(),
            self.payload_bytes,
            self.frames_sent,
            self.frames_accepted,
            self.retransmissions,
            self.retransmit_ratio() * 100.0,
            self.frames_rejected,
            self.out_of_order,
            self.duplicates,
            self.throughput(),
        )
    }
}

impl Default for TransferStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ratios_without_traffic() {
        let stats = TransferStats::new();
        assert_eq!(stats.retransmit_ratio(), 0.0);
        assert!(stats.summary().contains("Retransmits: 0"));
    }

    #[test]
    fn test_retransmit_ratio() {
        let mut stats = TransferStats::new();
        stats.data_frames = 4;
        stats.retransmissions = 1;
        assert!((stats.retransmit_ratio() - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn test_finish_freezes_elapsed() {
        let mut stats = TransferStats::new();
        stats.finish();
        let first = stats.elapsed();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(stats.elapsed(), first);
    }
}
