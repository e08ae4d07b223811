//! # FDP (File Dump Protocol)
//!
//! TCP 기반 대용량 파일 전송 프로토콜
//!
//! ## 핵심 특징
//! - **링 버퍼 파이프라이닝**: 락 없는 SPSC 링 버퍼로 디스크 I/O와 네트워크 I/O 중첩
//! - **청크 스트리밍**: 고정 크기 청크 + boolean EOF 플래그의 단순한 와이어 포맷
//! - **용량 기반 경로 선택**: 가용 공간이 가장 큰 디렉토리로 수신, 부족 시 삭제로 공간 확보
//! - **전송당 1 커넥션**: 파일 하나당 TCP 커넥션 하나, 스레드 2개 (프로토콜 + 디스크 펌프)
//! - **세션 격리**: 한 전송의 실패가 다른 전송에 전파되지 않음

pub mod config;
pub mod error;
pub mod paths;
pub mod protocol;
pub mod pump;
pub mod receiver;
pub mod registry;
pub mod ring;
pub mod sender;
pub mod stats;

pub use config::Config;
pub use error::{Error, Result};
pub use paths::{ActivePaths, FsProbe, SpaceProbe};
pub use protocol::{Handshake, SessionState};
pub use receiver::Receiver;
pub use registry::{TransferEntry, TransferRegistry};
pub use ring::{RingBuffer, RingConsumer, RingProducer};
pub use sender::{FileSender, Sender};
pub use stats::{StatsCollector, StatsSink, TransferRecord, TransferStats};

/// 기본 링 버퍼 슬롯 수
pub const DEFAULT_QUEUE_DEPTH: usize = 8;

/// 기본 블록 크기 (링 버퍼 슬롯 하나, 바이트)
pub const DEFAULT_BLOCK_SIZE: usize = 4 * 1024 * 1024; // 4MB

/// 기본 청크 크기 (와이어 전송 단위, 바이트)
pub const DEFAULT_CHUNK_SIZE: usize = 32768; // 32KB

/// 기본 서버 포트
pub const DEFAULT_PORT: u16 = 9988;
