//! 에러 타입 정의

use thiserror::Error;

/// FDP 프로토콜 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("전송 거부됨 (공간 부족, 파일 중복, 또는 모든 경로 사용 중): {file_name}")]
    Rejected { file_name: String },

    #[error("파일 크기 불일치: expected {expected}, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("수신측 마무리 실패: {file_name}")]
    FinalizeFailed { file_name: String },

    #[error("버퍼 큐 닫힘")]
    BufferClosed,

    #[error("버퍼 큐 에러 상태 (상대 스레드 I/O 실패)")]
    BufferFailed,

    #[error("프로토콜 위반: {0}")]
    Protocol(String),

    #[error("파일 이름이 너무 김: {len} bytes (최대 {max})")]
    NameTooLong { len: usize, max: usize },

    #[error("연결 종료")]
    ConnectionClosed,

    #[error("유효하지 않은 설정: {0}")]
    InvalidConfig(String),
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
