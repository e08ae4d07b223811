//! 송신자 (클라이언트측)
//!
//! - 파일 하나당 TCP 커넥션 하나
//! - 읽기 펌프 스레드가 링 버퍼를 채우고, 프로토콜 스레드가 비우면서 전송
//! - 거부는 에러가 아니라 예상된 결과 (디렉토리 스캐너가 다음 주기에 재시도)

use std::fs;
use std::io::{self, BufWriter};
use std::net::{SocketAddr, TcpStream};
use std::path::PathBuf;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Sender as ChannelSender};
use socket2::SockRef;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::protocol::{self, Handshake, SessionState};
use crate::pump::spawn_file_reader;
use crate::registry::TransferRegistry;
use crate::ring::{RingBuffer, RingConsumer};
use crate::stats::{StatsSink, TransferRecord};
use crate::{Config, Error, Result};

/// 파일 1개 전송 세션
pub struct FileSender {
    config: Config,
    server_addr: SocketAddr,
    path: PathBuf,
    file_name: String,
    file_size: u64,
}

impl FileSender {
    /// 전송할 파일의 메타데이터를 읽어 세션 준비
    pub fn new(config: Config, server_addr: SocketAddr, path: PathBuf) -> Result<Self> {
        config.validate()?;
        let meta = fs::metadata(&path)?;
        if !meta.is_file() {
            return Err(Error::Protocol(format!("일반 파일이 아님: {:?}", path)));
        }
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::Protocol(format!("유효하지 않은 파일 이름: {:?}", path)))?
            .to_string();

        Ok(Self {
            config,
            server_addr,
            path,
            file_name,
            file_size: meta.len(),
        })
    }

    /// 전송 실행, 성공 시 전송 바이트 수 반환
    ///
    /// 수신측 거부는 `Error::Rejected`로 구분됨
    pub fn run(&self) -> Result<u64> {
        let stream = TcpStream::connect(self.server_addr)?;
        stream.set_nodelay(false)?;
        if self.config.io_timeout_ms > 0 {
            let timeout = Some(Duration::from_millis(self.config.io_timeout_ms));
            stream.set_read_timeout(timeout)?;
            stream.set_write_timeout(timeout)?;
        }
        if self.config.socket_buffer_size > 0 {
            SockRef::from(&stream).set_send_buffer_size(self.config.socket_buffer_size)?;
        }

        let mut input = stream.try_clone()?;
        let mut out = BufWriter::with_capacity(self.config.chunk_size + 16, stream);

        debug!("세션 상태: {:?}", SessionState::Negotiating);
        Handshake::new(self.file_name.clone(), self.file_size).write_to(&mut out)?;

        if !protocol::read_bool(&mut input)? {
            info!(
                "수신측 거부 (공간 부족, 파일 중복, 또는 모든 경로 사용 중): {}",
                self.file_name
            );
            return Err(Error::Rejected {
                file_name: self.file_name.clone(),
            });
        }

        info!("전송 시작: {} ({} bytes)", self.file_name, self.file_size);
        debug!("세션 상태: {:?}", SessionState::Streaming);

        let (producer, mut consumer) =
            RingBuffer::channel(self.config.queue_depth, self.config.block_size);
        let reader = spawn_file_reader(self.path.clone(), producer);

        let result = self.stream_blocks(&mut out, &mut input, &mut consumer);

        // 에러 경로에서도 읽기 펌프가 스핀에 갇히지 않게 링을 닫음
        consumer.close();
        let _ = reader.join();

        let sent = result?;
        debug!("세션 상태: {:?}", SessionState::Done);
        info!("전송 완료: {}", self.file_name);

        if self.config.delete_after_transfer {
            fs::remove_file(&self.path)?;
            info!("원본 파일 삭제: {:?}", self.path);
        }
        Ok(sent)
    }

    /// 링 버퍼를 비우며 청크 전송, EOF와 마무리 ack까지 처리
    fn stream_blocks(
        &self,
        out: &mut BufWriter<TcpStream>,
        input: &mut TcpStream,
        consumer: &mut RingConsumer,
    ) -> Result<u64> {
        let mut sent = 0u64;

        loop {
            let (block, last) = consumer.poll()?;
            for chunk in block.chunks(self.config.chunk_size) {
                // go-ahead: 수신측 디스크가 느릴 때 소켓 버퍼를 채우지 않음
                if self.config.flow_control {
                    protocol::read_bool(input)?;
                }
                protocol::write_chunk(out, chunk)?;
                sent += chunk.len() as u64;
            }
            consumer.release();
            if last {
                break;
            }
        }

        debug!("세션 상태: {:?}", SessionState::Finalizing);
        if self.config.flow_control {
            protocol::read_bool(input)?;
        }
        protocol::write_eof(out)?;

        // 수신측의 마지막 쓰기를 기다린 뒤 닫아야 함. 먼저 닫으면
        // 상대가 EOF 대신 connection reset을 보게 됨
        let ack = match protocol::read_bool(input) {
            Ok(v) => v,
            Err(Error::Io(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                // ack 없이 연결이 끊김, 수신측이 중간에 내려간 경우
                return Err(Error::ConnectionClosed);
            }
            Err(e) => return Err(e),
        };
        if !ack {
            return Err(Error::FinalizeFailed {
                file_name: self.file_name.clone(),
            });
        }
        Ok(sent)
    }

    /// 파일 이름
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// 파일 크기 (바이트)
    pub fn file_size(&self) -> u64 {
        self.file_size
    }
}

/// 송신 풀: 파일 탐색 콜라보레이터가 넘긴 파일을 워커 스레드로 전송
///
/// 같은 이름이 진행 중이면 제출이 거절됨 (중복 전송 방지)
pub struct Sender {
    tx: Option<ChannelSender<PathBuf>>,
    registry: Arc<TransferRegistry>,
    workers: Vec<JoinHandle<()>>,
}

impl Sender {
    /// `max_transfers`개 워커로 풀 시작
    pub fn start(config: Config, server_addr: SocketAddr, stats: Option<StatsSink>) -> Self {
        let (tx, rx) = unbounded::<PathBuf>();
        let registry = Arc::new(TransferRegistry::new());

        let workers = (0..config.max_transfers.max(1))
            .map(|i| {
                let rx = rx.clone();
                let config = config.clone();
                let registry = registry.clone();
                let stats = stats.clone();

                thread::Builder::new()
                    .name(format!("fdp-send-{}", i))
                    .spawn(move || {
                        for path in rx {
                            run_one(&config, server_addr, path, &registry, stats.as_ref());
                        }
                    })
                    .expect("송신 워커 생성 실패")
            })
            .collect();

        Self {
            tx: Some(tx),
            registry,
            workers,
        }
    }

    /// 파일 제출. 같은 이름이 이미 진행 중이면 false
    pub fn submit(&self, path: PathBuf) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_owned) else {
            warn!("유효하지 않은 파일 이름, 무시: {:?}", path);
            return false;
        };
        if !self.registry.insert(&name, PathBuf::new(), None) {
            debug!("이미 진행 중, 제출 무시: {}", name);
            return false;
        }
        if let Some(tx) = &self.tx {
            if tx.send(path).is_ok() {
                return true;
            }
        }
        self.registry.remove(&name);
        false
    }

    /// 진행 중 전송 수
    pub fn active_transfers(&self) -> usize {
        self.registry.len()
    }

    /// 큐를 닫고 진행 중인 전송이 끝날 때까지 대기
    pub fn shutdown(mut self) {
        self.tx.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

/// 워커 본체: 세션 하나를 돌리고 결과를 기록
fn run_one(
    config: &Config,
    server_addr: SocketAddr,
    path: PathBuf,
    registry: &TransferRegistry,
    stats: Option<&StatsSink>,
) {
    let start = Instant::now();
    let result = FileSender::new(config.clone(), server_addr, path.clone())
        .and_then(|session| session.run().map(|bytes| (session, bytes)));

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("?")
        .to_string();

    match &result {
        Ok((_, bytes)) => {
            if let Some(sink) = stats {
                sink.submit(TransferRecord {
                    file_name: file_name.clone(),
                    bytes: *bytes,
                    elapsed: start.elapsed(),
                    success: true,
                });
            }
        }
        Err(Error::Rejected { .. }) => {
            // 재시도는 디렉토리 스캐너 몫, 여기서는 조용히 반납만
        }
        Err(e) => {
            warn!("전송 실패: {}: {}", file_name, e);
            if let Some(sink) = stats {
                sink.submit(TransferRecord {
                    file_name: file_name.clone(),
                    bytes: 0,
                    elapsed: start.elapsed(),
                    success: false,
                });
            }
        }
    }

    registry.remove(&file_name);
}
