//! SLT 수신자 - Serial Link Transfer
//!
//! TCP 연결 하나를 받아 세션을 수신하고 파일에 이어 씀
//! (시리얼 회선은 ser2net 등으로 TCP에 연결하여 사용)
//!
//! 사용법:
//!   cargo run --release --bin slt-recv -- [OPTIONS]
//!
//! 예시:
//!   slt-recv --listen 0.0.0.0:9000 --output received.bin --key secret
//!   SLT_KEY=secret slt-recv -l 0.0.0.0:9000 -o received.bin --config slow.toml

use std::net::SocketAddr;
use std::path::PathBuf;

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use slt::{Config, Receiver, SessionKey};

const USAGE: &str = r#"SLT Receiver - Serial Link Transfer 수신자

stop-and-wait 프레임 수신. 검증된 페이로드를 출력 파일에 이어 씀

사용법:
  slt-recv [OPTIONS]

옵션:
  -l, --listen <ADDR>    수신 대기 주소 (기본: 0.0.0.0:9000)
  -o, --output <PATH>    출력 파일 경로 (필수, 없으면 생성)
  -k, --key <KEY>        세션 키 (또는 SLT_KEY 환경변수)
  -c, --config <FILE>    TOML 설정 파일
  --legacy               기존 타이밍 사용 (재전송 무제한, 중복 재ACK 없음)
  -h, --help             이 도움말 출력

로그 레벨은 RUST_LOG로 지정 (기본: info)
"#;

/// 수신자 실행 설정
#[derive(Debug)]
struct RecvArgs {
    listen_addr: SocketAddr,
    output_path: PathBuf,
    key: String,
    config: Config,
}

/// `--help`면 None. `--config`가 있으면 `--legacy`는 무시
fn parse_args(args: &[String], env_key: Option<String>) -> Result<Option<RecvArgs>, String> {
    let mut listen_addr: SocketAddr = ([0, 0, 0, 0], 9000).into();
    let mut output_path = None;
    let mut key = env_key;
    let mut config_path = None;
    let mut legacy = false;

    let mut i = 1;
    while i < args.len() {
        let value = args.get(i + 1);
        match args[i].as_str() {
            "--listen" | "-l" => {
                let v = value.ok_or("--listen: 주소 필요")?;
                listen_addr = v.parse().map_err(|e| format!("--listen {}: {}", v, e))?;
                i += 1;
            }
            "--output" | "-o" => {
                output_path = Some(PathBuf::from(value.ok_or("--output: 경로 필요")?));
                i += 1;
            }
            "--key" | "-k" => {
                key = Some(value.ok_or("--key: 키 필요")?.clone());
                i += 1;
            }
            "--config" | "-c" => {
                config_path = Some(PathBuf::from(value.ok_or("--config: 경로 필요")?));
                i += 1;
            }
            "--legacy" => legacy = true,
            "--help" | "-h" => return Ok(None),
            other => return Err(format!("알 수 없는 옵션: {}", other)),
        }
        i += 1;
    }

    let config = match config_path {
        Some(path) => Config::load(&path).map_err(|e| format!("{}: {}", path.display(), e))?,
        None if legacy => Config::legacy(),
        None => Config::default(),
    };

    Ok(Some(RecvArgs {
        listen_addr,
        output_path: output_path.ok_or("--output 필요")?,
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

    info!("SLT Receiver starting...");
    info!("Listen address: {}", args.listen_addr);
    info!("Output: {:?}", args.output_path);
    info!(
        "Frame: {} byte chunk, {} hex checksum",
        args.config.chunk_size, args.config.checksum_len
    );

    let key = SessionKey::new(&args.key)?;
    let listener = TcpListener::bind(args.listen_addr).await?;
    let (stream, peer) = listener.accept().await?;
    stream.set_nodelay(true)?;
    info!("Sender connected: {}", peer);

    let mut receiver = Receiver::new(stream, &key, args.config)?;
    let stats = receiver.receive_to_file(&args.output_path).await?;

    info!("Received {} bytes -> {:?}", stats.payload_bytes, args.output_path);
    Ok(())
}
