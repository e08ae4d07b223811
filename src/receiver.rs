//! 수신자 (서버측)
//!
//! - 커넥션마다 세션 스레드 1개 + 쓰기 펌프 스레드 1개
//! - 경로 예약 실패 시 거부 bool 하나로 즉시 종료 (에러 아님)
//! - 세션 실패는 해당 커넥션만 정리하고 서버는 계속 동작

use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use socket2::SockRef;
use tracing::{debug, info, warn};

use crate::paths::ActivePaths;
use crate::protocol::{self, Handshake, SessionState};
use crate::pump::spawn_file_writer;
use crate::registry::TransferRegistry;
use crate::ring::{RingBuffer, RingProducer};
use crate::stats::{StatsSink, TransferRecord};
use crate::{Config, Error, Result};

/// 수신 서버
pub struct Receiver {
    config: Config,
    paths: Arc<ActivePaths>,
    registry: Arc<TransferRegistry>,
    stats: Option<StatsSink>,
}

impl Receiver {
    /// 설정의 output_directories로 서버 생성 (실제 파일시스템 조회)
    pub fn new(config: Config, stats: Option<StatsSink>) -> Result<Self> {
        config.validate()?;
        let registry = Arc::new(TransferRegistry::new());
        let paths = Arc::new(ActivePaths::new(&config, registry.clone()));
        Ok(Self {
            config,
            paths,
            registry,
            stats,
        })
    }

    /// 경로 선택기를 직접 주입해 생성 (테스트용 가짜 공간 조회 등)
    pub fn with_selector(
        config: Config,
        paths: Arc<ActivePaths>,
        registry: Arc<TransferRegistry>,
        stats: Option<StatsSink>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            paths,
            registry,
            stats,
        })
    }

    /// 주소에 바인드하고 수신 루프 시작 (반환하지 않음)
    pub fn bind_and_serve<A: ToSocketAddrs>(&self, addr: A) -> Result<()> {
        self.serve(TcpListener::bind(addr)?)
    }

    /// 수신 루프: 커넥션마다 세션 스레드를 띄움
    pub fn serve(&self, listener: TcpListener) -> Result<()> {
        info!("FDP Receiver started on {}", listener.local_addr()?);

        for stream in listener.incoming() {
            let stream = match stream {
                Ok(s) => s,
                Err(e) => {
                    warn!("커넥션 수락 에러: {}", e);
                    continue;
                }
            };

            let session = FileReceiver {
                config: self.config.clone(),
                paths: self.paths.clone(),
                stats: self.stats.clone(),
            };
            if let Err(e) = thread::Builder::new()
                .name("fdp-recv".into())
                .spawn(move || session.run(stream))
            {
                warn!("세션 스레드 생성 실패: {}", e);
            }
        }
        Ok(())
    }

    /// 진행 중 전송 레지스트리
    pub fn registry(&self) -> &Arc<TransferRegistry> {
        &self.registry
    }

    /// 경로 선택기
    pub fn paths(&self) -> &Arc<ActivePaths> {
        &self.paths
    }
}

/// 커넥션 1개 = 파일 1개 수신 세션
pub struct FileReceiver {
    config: Config,
    paths: Arc<ActivePaths>,
    stats: Option<StatsSink>,
}

impl FileReceiver {
    /// 세션 실행. 에러는 이 세션 안에서만 소비됨
    pub fn run(&self, stream: TcpStream) {
        let peer = stream.peer_addr().ok();
        if let Err(e) = self.handle(stream, peer) {
            warn!("수신 세션 종료 (에러): {}", e);
        }
    }

    fn handle(&self, stream: TcpStream, peer: Option<SocketAddr>) -> Result<()> {
        stream.set_nodelay(false)?;
        if self.config.io_timeout_ms > 0 {
            let timeout = Some(Duration::from_millis(self.config.io_timeout_ms));
            stream.set_read_timeout(timeout)?;
            stream.set_write_timeout(timeout)?;
        }
        if self.config.socket_buffer_size > 0 {
            SockRef::from(&stream).set_recv_buffer_size(self.config.socket_buffer_size)?;
        }

        let mut out = stream.try_clone()?;
        let mut input = BufReader::with_capacity(self.config.chunk_size * 2, stream);

        debug!("세션 상태: {:?}", SessionState::Negotiating);
        let hs = Handshake::read_from(&mut input)?;

        let Some(tmp_path) = self.paths.reserve(&hs.file_name, hs.file_size, peer) else {
            protocol::write_bool_flush(&mut out, false)?;
            info!(
                "거부 (공간 부족, 파일 중복, 또는 모든 경로 사용 중): {}",
                hs.file_name
            );
            return Ok(());
        };

        let start = Instant::now();
        let result = self.receive_file(&mut input, &mut out, &hs, &tmp_path);

        // 성공/실패 양쪽 모두 예약은 정확히 한 번 해제
        self.paths.release(&hs.file_name);

        match result {
            Ok(bytes) => {
                let elapsed = start.elapsed();
                let secs = elapsed.as_secs_f64().max(1e-9);
                info!(
                    "수신 완료: {}\tTime: {:.1} Sec\tSpeed: {:.0} MiB/s",
                    hs.file_name,
                    secs,
                    bytes as f64 / 1048576.0 / secs
                );
                self.submit_stats(&hs.file_name, bytes, elapsed, true);
                Ok(())
            }
            Err(e) => {
                let _ = fs::remove_file(&tmp_path);
                self.submit_stats(&hs.file_name, 0, start.elapsed(), false);
                Err(e)
            }
        }
    }

    /// 수락 후 스트리밍과 마무리까지. 성공 시 디스크에 쓴 바이트 수 반환
    fn receive_file(
        &self,
        input: &mut BufReader<TcpStream>,
        out: &mut TcpStream,
        hs: &Handshake,
        tmp_path: &Path,
    ) -> Result<u64> {
        let file = File::create(tmp_path)?;
        let (mut producer, consumer) =
            RingBuffer::channel(self.config.queue_depth, self.config.block_size);
        let writer = spawn_file_writer(file, consumer, self.config.write_buffer_size);

        protocol::write_bool_flush(out, true)?;
        info!("수신 시작: {} → {:?}", hs.file_name, tmp_path.parent());
        debug!("세션 상태: {:?}", SessionState::Streaming);

        let stream_result = self.stream_chunks(input, out, &mut producer);
        if stream_result.is_err() {
            // 쓰기 펌프가 스핀에 갇히지 않게 링을 에러 상태로 전환
            producer.fail();
        }

        debug!("세션 상태: {:?}", SessionState::Finalizing);
        let written = writer.join().map_err(|_| Error::BufferFailed)?;
        stream_result?;
        let written = written?;

        // 임시 이름을 본 이름으로 바꾼 뒤 크기 검증
        let final_path = tmp_path.with_file_name(&hs.file_name);
        fs::rename(tmp_path, &final_path)?;
        let actual = fs::metadata(&final_path)?.len();
        if actual != hs.file_size {
            protocol::write_bool_flush(out, false)?;
            let _ = fs::remove_file(&final_path);
            return Err(Error::SizeMismatch {
                expected: hs.file_size,
                actual,
            });
        }

        protocol::write_bool_flush(out, true)?;
        debug!("세션 상태: {:?}", SessionState::Done);
        Ok(written)
    }

    /// 청크를 현재 슬롯에 누적하고, 블록이 차면 발행
    fn stream_chunks(
        &self,
        input: &mut BufReader<TcpStream>,
        out: &mut TcpStream,
        producer: &mut RingProducer,
    ) -> Result<()> {
        let block_size = producer.block_size();
        let mut offset = 0usize;

        loop {
            // 쓰기 펌프 쪽 실패를 매 반복 확인 (영원한 수신 방지)
            if producer.is_failed() {
                return Err(Error::BufferFailed);
            }

            // go-ahead: 다음 청크를 받을 준비가 됐음을 알림
            if self.config.flow_control {
                protocol::write_bool_flush(out, true)?;
            }

            match protocol::read_chunk_header(input)? {
                None => {
                    // EOF: 잔여분을 마지막 슬롯으로 발행 (0일 수도 있음)
                    producer.publish(offset, true)?;
                    return Ok(());
                }
                Some(mut len) => {
                    // 송신측 블록 크기가 달라 청크가 슬롯 경계에 걸릴 수 있음
                    while len > 0 {
                        let take = len.min(block_size - offset);
                        let slot = producer.slot();
                        input.read_exact(&mut slot[offset..offset + take])?;
                        offset += take;
                        len -= take;
                        if offset == block_size {
                            producer.publish(block_size, false)?;
                            offset = 0;
                        }
                    }
                }
            }
        }
    }

    fn submit_stats(&self, file_name: &str, bytes: u64, elapsed: Duration, success: bool) {
        if let Some(sink) = &self.stats {
            sink.submit(TransferRecord {
                file_name: file_name.to_string(),
                bytes,
                elapsed,
                success,
            });
        }
    }
}
