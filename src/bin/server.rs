//! FDP 서버 (수신자) - File Dump Protocol
//!
//! 링 버퍼 파이프라이닝 기반 TCP 파일 수신 서버
//! - 가용 공간이 가장 큰 디렉토리로 수신, 부족 시 삭제로 공간 확보
//! - 커넥션당 세션 스레드 + 쓰기 펌프 스레드
//!
//! 사용법:
//!   cargo run --release --bin fdp-server -- [OPTIONS]
//!
//! 예시:
//!   # 기본 수신
//!   cargo run --release --bin fdp-server -- --bind 0.0.0.0:9988 --dir /mnt/disk1
//!
//!   # 디렉토리당 1 전송 + 공간 확보 삭제
//!   cargo run --release --bin fdp-server -- -d /mnt/disk1 -d /mnt/disk2 \
//!       --one-per-dir --delete-for-space --deletion-dir /mnt/disk1/old \
//!       --delete-types bak,tmp --delete-threshold 100

use std::net::SocketAddr;
use std::path::PathBuf;

use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use fdp::{Config, Receiver, StatsCollector, DEFAULT_PORT};

/// 서버 설정
struct ServerConfig {
    bind_addr: SocketAddr,
    stats_file: Option<PathBuf>,
    verbose: bool,
    config: Config,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            stats_file: Some(PathBuf::from("transfer_stats.csv")),
            verbose: false,
            config: Config::default(),
        }
    }
}

fn parse_args() -> ServerConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = ServerConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--bind" | "-b" => {
                if i + 1 < args.len() {
                    config.bind_addr = args[i + 1].parse().expect("유효한 주소 필요");
                    i += 1;
                }
            }
            "--dir" | "-d" => {
                if i + 1 < args.len() {
                    config.config.output_directories.push(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--one-per-dir" => {
                config.config.one_transfer_per_directory = true;
            }
            "--no-overwrite" => {
                config.config.overwrite_existing = false;
            }
            "--delete-for-space" => {
                config.config.delete_for_space = true;
            }
            "--deletion-dir" => {
                if i + 1 < args.len() {
                    config.config.deletion_directories.push(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--delete-types" => {
                if i + 1 < args.len() {
                    config.config.deleted_file_types =
                        args[i + 1].split(',').map(str::to_string).collect();
                    i += 1;
                }
            }
            "--delete-threshold" => {
                // MiB 단위
                if i + 1 < args.len() {
                    let mib: u64 = args[i + 1].parse().expect("유효한 숫자 필요");
                    config.config.deletion_threshold = mib * 1048576;
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
            "--no-stats" => {
                config.stats_file = None;
            }
            "--stats-file" => {
                if i + 1 < args.len() {
                    config.stats_file = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--verbose" | "-v" => {
                config.verbose = true;
            }
            "--help" | "-h" => {
                println!(
                    r#"FDP Server - File Dump Protocol 수신 서버

링 버퍼 파이프라이닝 기반 TCP 파일 수신 서버
- 가용 공간이 가장 큰 디렉토리 선택 + 공간 확보 삭제
- 커넥션당 스레드 2개 (프로토콜 + 디스크 펌프)

사용법:
  cargo run --release --bin fdp-server -- [OPTIONS]

옵션:
  -b, --bind <ADDR>         바인드 주소 (기본: 0.0.0.0:9988)
  -d, --dir <PATH>          수신 후보 디렉토리 (반복 지정)
  --one-per-dir             디렉토리당 동시 전송 1개 제한
  --no-overwrite            동명 파일 덮어쓰기 금지
  --delete-for-space        공간 부족 시 삭제 허용
  --deletion-dir <PATH>     삭제 후보 디렉토리 (반복 지정)
  --delete-types <EXT,..>   삭제 허용 확장자 (쉼표 구분)
  --delete-threshold <MIB>  삭제 최소 파일 크기 MiB
  --block-size <SIZE>       블록 크기 바이트 (기본: 4194304)
  --chunk-size <SIZE>       청크 크기 바이트 (기본: 32768)
  --queue-depth <N>         링 버퍼 슬롯 수 (기본: 8)
  --flow-control            청크별 go-ahead 흐름 제어 (양쪽 일치 필요)
  --stats-file <PATH>       일별 통계 CSV 경로 (기본: transfer_stats.csv)
  --no-stats                일별 통계 기록 끔
  -v, --verbose             디버그 로그
  -h, --help                이 도움말 출력
"#
                );
                std::process::exit(0);
            }
            _ => {}
        }
        i += 1;
    }

    config
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let server_config = parse_args();

    // 로깅 설정
    let subscriber = FmtSubscriber::builder()
        .with_max_level(if server_config.verbose {
            Level::DEBUG
        } else {
            Level::INFO
        })
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if server_config.config.output_directories.is_empty() {
        eprintln!("수신 디렉토리가 없습니다 (--dir), 종료");
        std::process::exit(1);
    }

    info!("FDP Server starting...");
    info!("Bind address: {}", server_config.bind_addr);
    info!("Output directories: {:?}", server_config.config.output_directories);
    info!("Block size: {} bytes", server_config.config.block_size);
    info!("Chunk size: {} bytes", server_config.config.chunk_size);
    info!("Queue depth: {}", server_config.config.queue_depth);
    info!("Flow control: {}", server_config.config.flow_control);

    let collector = StatsCollector::start(server_config.stats_file.clone());
    let receiver = Receiver::new(server_config.config, Some(collector.sink()))?;

    receiver.bind_and_serve(server_config.bind_addr)?;
    Ok(())
}
