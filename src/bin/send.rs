//! SLT 송신자 - Serial Link Transfer
//!
//! 수신자에 TCP로 연결하여 파일 하나를 stop-and-wait로 전송
//!
//! 사용법:
//!   cargo run --release --bin slt-send -- [OPTIONS]
//!
//! 예시:
//!   slt-send --connect 127.0.0.1:9000 --file data.bin --key secret
//!   slt-send -c 127.0.0.1:9000 -f data.bin --ack-timeout 3000 --max-retries unbounded

use std::net::SocketAddr;
use std::path::PathBuf;

use tokio::net::TcpStream;
use tracing::info;
use tracing_subscriber::EnvFilter;

use slt::{Config, SessionKey, Sender};

const USAGE: &str = r#"SLT Sender - Serial Link Transfer 송신자

stop-and-wait 프레임 전송. 프레임마다 ACK를 기다리고 타임아웃 시 재전송

사용법:
  slt-send [OPTIONS]

옵션:
  -c, --connect <ADDR>         수신자 주소 (기본: 127.0.0.1:9000)
  -f, --file <PATH>            전송할 파일 경로 (필수)
  -k, --key <KEY>              세션 키 (또는 SLT_KEY 환경변수)
  --config <FILE>              TOML 설정 파일
  --ack-timeout <MS>           ACK 대기 시간 ms (기본: 1000)
  --max-retries <N|unbounded>  프레임당 재전송 한도 (기본: 16)
  --legacy                     기존 타이밍 사용 (재전송 무제한, 핸드쉐이크 무제한)
  -h, --help                   이 도움말 출력

로그 레벨은 RUST_LOG로 지정 (기본: info)
"#;

/// 송신자 실행 설정
#[derive(Debug)]
struct SendArgs {
    connect_addr: SocketAddr,
    file_path: PathBuf,
    key: String,
    config: Config,
}

fn parse_max_retries(value: &str) -> Result<Option<u32>, String> {
    match value {
        "unbounded" | "none" => Ok(None),
        n => n
            .parse()
            .map(Some)
            .map_err(|e| format!("--max-retries {}: {}", n, e)),
    }
}

/// 명령행 인자 파싱
///
/// `args[0]`은 프로그램 이름. `env_key`는 `SLT_KEY` 값 (`--key`가 우선).
/// `--help`면 None
fn parse_args(args: &[String], env_key: Option<String>) -> Result<Option<SendArgs>, String> {
    let mut connect_addr: SocketAddr = ([127, 0, 0, 1], 9000).into();
    let mut file_path = None;
    let mut key = env_key;
    let mut config_path = None;
    let mut legacy = false;
    let mut ack_timeout_ms = None;
    let mut max_retries = None;

    let mut i = 1;
    while i < args.len() {
        let value = args.get(i + 1);
        match args[i].as_str() {
            "--connect" | "-c" => {
                let v = value.ok_or("--connect: 주소 필요")?;
                connect_addr = v.parse().map_err(|e| format!("--connect {}: {}", v, e))?;
                i += 1;
            }
            "--file" | "-f" => {
                file_path = Some(PathBuf::from(value.ok_or("--file: 경로 필요")?));
                i += 1;
            }
            "--key" | "-k" => {
                key = Some(value.ok_or("--key: 키 필요")?.clone());
                i += 1;
            }
            "--config" => {
                config_path = Some(PathBuf::from(value.ok_or("--config: 경로 필요")?));
                i += 1;
            }
            "--ack-timeout" => {
                let v = value.ok_or("--ack-timeout: ms 필요")?;
                ack_timeout_ms = Some(
                    v.parse::<u64>()
                        .map_err(|e| format!("--ack-timeout {}: {}", v, e))?,
                );
                i += 1;
            }
            "--max-retries" => {
                max_retries = Some(parse_max_retries(value.ok_or("--max-retries: 값 필요")?)?);
                i += 1;
            }
            "--legacy" => legacy = true,
            "--help" | "-h" => return Ok(None),
            other => return Err(format!("알 수 없는 옵션: {}", other)),
        }
        i += 1;
    }

    let mut config = match config_path {
        Some(path) => Config::load(&path).map_err(|e| format!("{}: {}", path.display(), e))?,
        None if legacy => Config::legacy(),
        None => Config::default(),
    };

    // 명령행 값이 파일보다 우선
    if let Some(ms) = ack_timeout_ms {
        config.ack_timeout_ms = ms;
    }
    if let Some(retries) = max_retries {
        config.max_retransmissions = retries;
    }
    config.validate().map_err(|e| e.to_string())?;

    Ok(Some(SendArgs {
        connect_addr,
        file_path: file_path.ok_or("--file 필요")?,
        key: key.ok_or("--key 또는 SLT_KEY 필요")?,
        config,
    }))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let argv: Vec<String> = std::env::args().collect();
    let args = match parse_args(&argv, std::env::var("SLT_KEY").ok()) {
        Ok(Some(args)) => args,
        Ok(None) => {
            println!("{}", USAGE);
            return Ok(());
        }
        Err(msg) => {
            eprintln!("{}\n\n{}", msg, USAGE);
            std::process::exit(2);
        }
    };

    info!("SLT Sender starting...");
    info!("Receiver address: {}", args.connect_addr);
    info!("ACK timeout: {} ms", args.config.ack_timeout_ms);
    match args.config.max_retransmissions {
        Some(n) => info!("Max retransmissions: {}", n),
        None => info!("Max retransmissions: unbounded"),
    }

    let key = SessionKey::new(&args.key)?;
    let data = tokio::fs::read(&args.file_path).await?;
    info!("Loaded {:?}: {} bytes", args.file_path, data.len());

    let stream = TcpStream::connect(args.connect_addr).await?;
    stream.set_nodelay(true)?;

    let mut sender = Sender::new(stream, &key, args.config)?;
    let stats = sender.send(&data).await?;

    info!(
        "Sent {} bytes in {} frames ({} retransmissions)",
        stats.payload_bytes, stats.frames_sent, stats.retransmissions
    );
    Ok(())
}
