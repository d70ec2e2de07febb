//! 링크 시뮬레이터 (결함 주입 중계기)
//!
//! 송신자와 수신자 사이에 끼워 넣는 메모리 중계기.
//! 정방향(송신자 → 수신자)은 고정 크기 프레임 단위로,
//! 역방향(수신자 → 송신자)은 ACK 줄 단위로 중계하면서 결함을 적용함.
//!
//! | 결함             | 설명                                         |
//! |------------------|----------------------------------------------|
//! | `DropFrame`      | 해당 시퀀스 프레임의 처음 N회 전송을 버림        |
//! | `CorruptFrame`   | 처음 N회 전송의 지정 비트를 반전                 |
//! | `DuplicateFrame` | 처음 N회 전송을 두 번씩 전달                     |
//! | `DropAck`        | 해당 ACK의 처음 N회를 버림                       |
//! | `loss_rate`      | 시드 고정 RNG로 무작위 데이터 프레임 손실        |
//! | `ack_loss_rate`  | 시드 고정 RNG로 무작위 ACK 손실                  |
//!
//! 테스트 하네스는 `SimulatorHandle::inject_ack`로 송신자에게 ACK를 직접 넣을 수 있음

use std::collections::HashMap;

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::io::{
    AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::frame::{FrameLayout, SeqField};
use crate::link::memory_pair;
use crate::message::{AckMessage, LINE_TERMINATOR};

/// 결함 규칙
///
/// `times`는 해당 대상의 처음 몇 번에 적용할지 (`u32::MAX` = 항상)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    DropFrame { seq: SeqField, times: u32 },
    CorruptFrame { seq: SeqField, times: u32, bit: usize },
    DuplicateFrame { seq: SeqField, times: u32 },
    DropAck { seq: u32, times: u32 },
}

/// 시뮬레이터 설정
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// 프레임 레이아웃 (송수신자와 같아야 함)
    pub layout: FrameLayout,

    /// 결정적 결함 규칙
    pub faults: Vec<Fault>,

    /// 무작위 프레임 손실률 (0.0 ~ 1.0)
    pub loss_rate: f64,

    /// 무작위 ACK 손실률 (0.0 ~ 1.0)
    pub ack_loss_rate: f64,

    /// RNG 시드
    pub seed: u64,

    /// 내부 파이프 버퍼 크기
    pub capacity: usize,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        // 결함 없음: 투명한 중계기
        Self {
            layout: FrameLayout::default(),
            faults: Vec::new(),
            loss_rate: 0.0,
            ack_loss_rate: 0.0,
            seed: 0,
            capacity: 1 << 16,
        }
    }
}

impl SimulatorConfig {
    pub fn with_fault(mut self, fault: Fault) -> Self {
        self.faults.push(fault);
        self
    }
}

/// 중계 기록
#[derive(Debug, Clone, Default)]
pub struct SimulatorReport {
    /// 송신자가 보낸 프레임 (변조 전 원본), 전송 순서대로
    pub frames: Vec<(Option<SeqField>, Bytes)>,

    pub frames_dropped: u64,
    pub frames_corrupted: u64,
    pub frames_duplicated: u64,

    /// 수신자가 보낸 줄, 순서대로
    pub acks: Vec<String>,

    /// 송신자에게 실제로 전달된 줄 (주입 포함)
    pub acks_delivered: Vec<String>,

    pub acks_dropped: u64,
    pub acks_injected: u64,
}

impl SimulatorReport {
    /// 특정 시퀀스 프레임의 전송 기록
    pub fn transmissions(&self, seq: SeqField) -> Vec<&Bytes> {
        self.frames
            .iter()
            .filter(|(s, _)| *s == Some(seq))
            .map(|(_, bytes)| bytes)
            .collect()
    }

    /// 서로 다른 데이터 프레임 수 (재전송, FIN 제외)
    pub fn distinct_data_frames(&self) -> usize {
        let mut seen: Vec<u32> = self
            .frames
            .iter()
            .filter_map(|(s, _)| match s {
                Some(SeqField::Data(seq)) => Some(*seq),
                _ => None,
            })
            .collect();
        seen.sort_unstable();
        seen.dedup();
        seen.len()
    }
}

/// 실행 중인 시뮬레이터 핸들
pub struct SimulatorHandle {
    frames: JoinHandle<FrameTap>,
    acks: JoinHandle<AckTap>,
    inject_tx: mpsc::UnboundedSender<AckMessage>,
}

impl SimulatorHandle {
    /// 송신자 방향으로 ACK 주입
    pub fn inject_ack(&self, ack: AckMessage) -> bool {
        self.inject_tx.send(ack).is_ok()
    }

    /// 양쪽 링크가 모두 닫힐 때까지 기다린 뒤 기록 반환
    pub async fn report(self) -> SimulatorReport {
        drop(self.inject_tx);
        let frames = self.frames.await.unwrap_or_default();
        let acks = self.acks.await.unwrap_or_default();

        SimulatorReport {
            frames: frames.frames,
            frames_dropped: frames.dropped,
            frames_corrupted: frames.corrupted,
            frames_duplicated: frames.duplicated,
            acks: acks.seen,
            acks_delivered: acks.delivered,
            acks_dropped: acks.dropped,
            acks_injected: acks.injected,
        }
    }
}

/// 링크 시뮬레이터
pub struct LinkSimulator;

impl LinkSimulator {
    /// 중계기 시작
    ///
    /// 반환: (송신자용 링크, 수신자용 링크, 핸들)
    pub fn spawn(config: SimulatorConfig) -> (DuplexStream, DuplexStream, SimulatorHandle) {
        let (sender_link, sender_side) = memory_pair(config.capacity);
        let (receiver_link, receiver_side) = memory_pair(config.capacity);

        let (from_sender, to_sender) = tokio::io::split(sender_side);
        let (from_receiver, to_receiver) = tokio::io::split(receiver_side);
        let (inject_tx, inject_rx) = mpsc::unbounded_channel();

        let mut frame_faults = Vec::new();
        let mut ack_faults = Vec::new();
        for fault in config.faults {
            match fault {
                Fault::DropAck { .. } => ack_faults.push(fault),
                _ => frame_faults.push(fault),
            }
        }

        let frames = tokio::spawn(relay_frames(
            from_sender,
            to_receiver,
            config.layout,
            frame_faults,
            config.loss_rate,
            StdRng::seed_from_u64(config.seed),
        ));
        let acks = tokio::spawn(relay_acks(
            from_receiver,
            to_sender,
            inject_rx,
            ack_faults,
            config.ack_loss_rate,
            StdRng::seed_from_u64(config.seed.wrapping_add(1)),
        ));

        let handle = SimulatorHandle {
            frames,
            acks,
            inject_tx,
        };
        (sender_link, receiver_link, handle)
    }
}

#[derive(Debug, Default)]
struct FrameTap {
    frames: Vec<(Option<SeqField>, Bytes)>,
    dropped: u64,
    corrupted: u64,
    duplicated: u64,
}

#[derive(Debug, Default)]
struct AckTap {
    seen: Vec<String>,
    delivered: Vec<String>,
    dropped: u64,
    injected: u64,
}

async fn relay_frames(
    mut from_sender: ReadHalf<DuplexStream>,
    mut to_receiver: WriteHalf<DuplexStream>,
    layout: FrameLayout,
    faults: Vec<Fault>,
    loss_rate: f64,
    mut rng: StdRng,
) -> FrameTap {
    let mut tap = FrameTap::default();
    let mut occurrences: HashMap<Option<SeqField>, u32> = HashMap::new();
    let mut buf = vec![0u8; layout.frame_len()];

    while from_sender.read_exact(&mut buf).await.is_ok() {
        let seq = SeqField::parse(&buf[layout.seq_range()]).ok();
        tap.frames.push((seq, Bytes::copy_from_slice(&buf)));

        let count = occurrences.entry(seq).or_insert(0);
        *count += 1;
        let occurrence = *count;

        let mut out = buf.clone();
        let mut copies = 1;
        for fault in &faults {
            match *fault {
                Fault::DropFrame { seq: s, times } if Some(s) == seq && occurrence <= times => {
                    copies = 0;
                }
                Fault::CorruptFrame { seq: s, times, bit } if Some(s) == seq && occurrence <= times => {
                    let byte = (bit / 8) % out.len();
                    out[byte] ^= 1 << (bit % 8);
                    tap.corrupted += 1;
                }
                Fault::DuplicateFrame { seq: s, times } if Some(s) == seq && occurrence <= times => {
                    if copies > 0 {
                        copies = 2;
                    }
                }
                _ => {}
            }
        }
        // FIN은 ACK가 없어 복구할 수 없으므로 무작위 손실에서 제외
        let is_data = matches!(seq, Some(SeqField::Data(_)));
        if copies > 0 && is_data && loss_rate > 0.0 && rng.gen::<f64>() < loss_rate {
            copies = 0;
        }

        match copies {
            0 => {
                debug!("sim: 프레임 손실 seq={:?} (#{})", seq, occurrence);
                tap.dropped += 1;
                continue;
            }
            2 => tap.duplicated += 1,
            _ => {}
        }

        let mut failed = false;
        for _ in 0..copies {
            if to_receiver.write_all(&out).await.is_err() {
                failed = true;
                break;
            }
        }
        if failed {
            break;
        }
    }

    let _ = to_receiver.shutdown().await;
    tap
}

async fn relay_acks(
    from_receiver: ReadHalf<DuplexStream>,
    mut to_sender: WriteHalf<DuplexStream>,
    mut inject_rx: mpsc::UnboundedReceiver<AckMessage>,
    faults: Vec<Fault>,
    loss_rate: f64,
    mut rng: StdRng,
) -> AckTap {
    let mut tap = AckTap::default();
    let mut occurrences: HashMap<String, u32> = HashMap::new();
    let mut reader = BufReader::new(from_receiver);
    let mut line = Vec::new();

    loop {
        // read_until은 취소되어도 읽은 바이트를 `line`에 남김
        let outgoing = tokio::select! {
            read = reader.read_until(LINE_TERMINATOR, &mut line) => {
                match read {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
                let text = String::from_utf8_lossy(&line).trim().to_string();
                line.clear();
                tap.seen.push(text.clone());

                let count = occurrences.entry(text.clone()).or_insert(0);
                *count += 1;
                let occurrence = *count;

                let ack = AckMessage::parse(&text);
                let scripted_drop = faults.iter().any(|fault| match *fault {
                    Fault::DropAck { seq, times } => {
                        ack.map_or(false, |a| a.seq == seq) && occurrence <= times
                    }
                    _ => false,
                });
                let random_drop = loss_rate > 0.0 && rng.gen::<f64>() < loss_rate;

                if scripted_drop || random_drop {
                    debug!("sim: ACK 손실 {:?} (#{})", text, occurrence);
                    tap.dropped += 1;
                    continue;
                }
                text
            }
            Some(ack) = inject_rx.recv() => {
                tap.injected += 1;
                ack.to_string()
            }
        };

        let mut bytes = outgoing.clone().into_bytes();
        bytes.push(LINE_TERMINATOR);
        if to_sender.write_all(&bytes).await.is_err() {
            break;
        }
        tap.delivered.push(outgoing);
    }

    let _ = to_sender.shutdown().await;
    tap
}
