//! 프로토콜 설정
//!
//! 세션 생성 시점에 스냅샷으로 전달됨. 실행 중 변경은 이후에 생성되는
//! 세션에만 적용되고, 진행 중인 세션은 끝까지 기존 값을 사용함.

use std::path::PathBuf;

use crate::{Error, Result, DEFAULT_BLOCK_SIZE, DEFAULT_CHUNK_SIZE, DEFAULT_QUEUE_DEPTH};

/// FDP 프로토콜 설정
#[derive(Debug, Clone)]
pub struct Config {
    /// 링 버퍼 슬롯 수
    pub queue_depth: usize,

    /// 블록 크기 (링 버퍼 슬롯 하나의 용량, 바이트)
    pub block_size: usize,

    /// 청크 크기 (와이어 전송 단위, 바이트)
    pub chunk_size: usize,

    /// 디스크 쓰기 버퍼 크기 (바이트)
    pub write_buffer_size: usize,

    /// 소켓 송수신 버퍼 크기 (0이면 OS 기본값)
    pub socket_buffer_size: usize,

    /// 소켓 읽기/쓰기 타임아웃 (밀리초, 0이면 무제한)
    pub io_timeout_ms: u64,

    /// 청크별 go-ahead 흐름 제어 사용 여부
    /// 양쪽 끝의 설정이 일치해야 함 (불일치 시 데드락)
    pub flow_control: bool,

    /// 최대 동시 전송 수 (송신측 워커 스레드 수)
    pub max_transfers: usize,

    /// 전송 성공 후 원본 파일 삭제 (송신측)
    pub delete_after_transfer: bool,

    /// 수신 후보 디렉토리 목록 (수신측)
    pub output_directories: Vec<PathBuf>,

    /// 디렉토리당 동시 전송 1개 제한
    pub one_transfer_per_directory: bool,

    /// 동명 파일 덮어쓰기 허용
    pub overwrite_existing: bool,

    /// 공간 부족 시 기존 파일 삭제 허용
    pub delete_for_space: bool,

    /// 삭제 후보 디렉토리 목록
    pub deletion_directories: Vec<PathBuf>,

    /// 삭제 허용 확장자 목록 (점 없이, 예: "bak")
    pub deleted_file_types: Vec<String>,

    /// 삭제 최소 파일 크기 (바이트)
    pub deletion_threshold: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            queue_depth: DEFAULT_QUEUE_DEPTH,
            block_size: DEFAULT_BLOCK_SIZE,
            chunk_size: DEFAULT_CHUNK_SIZE,
            write_buffer_size: 4 * 1024 * 1024, // 4MB
            socket_buffer_size: 32768,          // 32KB
            io_timeout_ms: 120_000,             // 2분
            flow_control: false,
            max_transfers: 3,
            delete_after_transfer: false,
            output_directories: Vec::new(),
            one_transfer_per_directory: false,
            overwrite_existing: true,
            delete_for_space: false,
            deletion_directories: Vec::new(),
            deleted_file_types: Vec::new(),
            deletion_threshold: u64::MAX,
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 저사양 기기용 설정
    pub fn low_memory() -> Self {
        Self {
            queue_depth: 4,
            block_size: 1024 * 1024,            // 1MB
            chunk_size: 16384,                  // 16KB
            write_buffer_size: 512 * 1024,      // 512KB
            socket_buffer_size: 16384,
            max_transfers: 1,
            ..Self::default()
        }
    }

    /// 고성능 기기용 설정
    pub fn high_throughput() -> Self {
        Self {
            queue_depth: 8,
            block_size: 8 * 1024 * 1024,        // 8MB
            chunk_size: 65536,                  // 64KB
            write_buffer_size: 8 * 1024 * 1024, // 8MB
            socket_buffer_size: 262144,         // 256KB
            max_transfers: 6,
            ..Self::default()
        }
    }

    /// 블록당 청크 수 계산
    pub fn chunks_per_block(&self) -> usize {
        (self.block_size + self.chunk_size - 1) / self.chunk_size
    }

    /// 설정 값 검증
    pub fn validate(&self) -> Result<()> {
        if self.queue_depth < 2 {
            return Err(Error::InvalidConfig("queue_depth는 2 이상이어야 함".into()));
        }
        if self.block_size == 0 || self.chunk_size == 0 {
            return Err(Error::InvalidConfig("block_size/chunk_size는 0일 수 없음".into()));
        }
        if self.chunk_size > self.block_size {
            return Err(Error::InvalidConfig(
                "chunk_size는 block_size를 초과할 수 없음".into(),
            ));
        }
        Ok(())
    }
}
