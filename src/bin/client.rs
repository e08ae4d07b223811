//! FDP 클라이언트 (송신자) - File Dump Protocol
//!
//! 지정한 파일들을 서버로 전송
//! - 파일당 커넥션 1개, 워커 스레드로 동시 전송
//! - 거부된 파일은 건너뜀 (서버 공간 부족 등, 에러 아님)
//!
//! 사용법:
//!   cargo run --release --bin fdp-client -- [OPTIONS] <FILE>...
//!
//! 예시:
//!   # 기본 전송
//!   cargo run --release --bin fdp-client -- --server 192.168.0.10:9988 big.bin
//!
//!   # 전송 후 원본 삭제 + 동시 3개
//!   cargo run --release --bin fdp-client -- -s 192.168.0.10:9988 \
//!       --delete-after --max-transfers 3 *.ckpt

use std::net::SocketAddr;
use std::path::PathBuf;

use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use fdp::{Config, Sender, StatsCollector, DEFAULT_PORT};

/// 클라이언트 설정
struct ClientConfig {
    server_addr: SocketAddr,
    files: Vec<PathBuf>,
    verbose: bool,
    config: Config,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
            files: Vec::new(),
            verbose: false,
            config: Config::default(),
        }
    }
}

fn parse_args() -> ClientConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = ClientConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--server" | "-s" => {
                if i + 1 < args.len() {
                    config.server_addr = args[i + 1].parse().expect("유효한 주소 필요");
                    i += 1;
                }
            }
            "--delete-after" => {
                config.config.delete_after_transfer = true;
            }
            "--max-transfers" => {
                if i + 1 < args.len() {
                    config.config.max_transfers = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--block-size" => {
                if i + 1 < args.len() {
                    config.config.block_size = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--chunk-size" => {
                if i + 1 < args.len() {
                    config.config.chunk_size = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--queue-depth" => {
                if i + 1 < args.len() {
                    config.config.queue_depth = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--flow-control" => {
                config.config.flow_control = true;
            }
            "--verbose" | "-v" => {
                config.verbose = true;
            }
            "--help" | "-h" => {
                println!(
                    r#"FDP Client - File Dump Protocol 송신 클라이언트

지정한 파일들을 FDP 서버로 전송

사용법:
  cargo run --release --bin fdp-client -- [OPTIONS] <FILE>...

옵션:
  -s, --server <ADDR>     서버 주소 (기본: 127.0.0.1:9988)
  --delete-after          전송 성공 후 원본 삭제
  --max-transfers <N>     동시 전송 수 (기본: 3)
  --block-size <SIZE>     블록 크기 바이트 (기본: 4194304)
  --chunk-size <SIZE>     청크 크기 바이트 (기본: 32768)
  --queue-depth <N>       링 버퍼 슬롯 수 (기본: 8)
  --flow-control          청크별 go-ahead 흐름 제어 (양쪽 일치 필요)
  -v, --verbose           디버그 로그
  -h, --help              이 도움말 출력
"#
                );
                std::process::exit(0);
            }
            arg if !arg.starts_with('-') => {
                config.files.push(PathBuf::from(arg));
            }
            _ => {}
        }
        i += 1;
    }

    config
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let client_config = parse_args();

    // 로깅 설정
    let subscriber = FmtSubscriber::builder()
        .with_max_level(if client_config.verbose {
            Level::DEBUG
        } else {
            Level::INFO
        })
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if client_config.files.is_empty() {
        eprintln!("전송할 파일이 없습니다, 종료");
        std::process::exit(1);
    }

    info!("FDP Client starting...");
    info!("Server address: {}", client_config.server_addr);
    info!("Files: {}", client_config.files.len());
    info!("Max transfers: {}", client_config.config.max_transfers);

    let collector = StatsCollector::start(None);
    let sender = Sender::start(
        client_config.config,
        client_config.server_addr,
        Some(collector.sink()),
    );

    for file in client_config.files {
        if !sender.submit(file.clone()) {
            info!("제출 거절 (중복 이름): {:?}", file);
        }
    }

    // 큐를 닫고 모든 전송이 끝날 때까지 대기
    sender.shutdown();

    let stats = collector.shutdown();
    info!(
        "완료: {}/{} 성공, {:.2} MiB, 평균 {:.2} MiB/s",
        stats.completed_files,
        stats.total_files,
        stats.total_bytes as f64 / 1048576.0,
        stats.throughput_mib()
    );
    Ok(())
}
