//! 디스크 펌프 스레드
//!
//! - 송신측: 파일 → 링 버퍼 (읽기 펌프)
//! - 수신측: 링 버퍼 → 파일 (쓰기 펌프)
//!
//! 소켓 쪽 절반은 프로토콜 루프 자체이므로 sender/receiver에 있음.
//! 마지막 블록의 유효 길이는 항상 슬롯 용량과 별도로 발행됨.

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::PathBuf;
use std::thread::{self, JoinHandle};

use tracing::warn;

use crate::ring::{RingConsumer, RingProducer};
use crate::Result;

/// 파일을 블록 단위로 읽어 링 버퍼에 발행하는 스레드 시작
///
/// EOF에서 잔여 크기로 마지막 슬롯을 발행함 (크기가 블록 배수면 빈 슬롯).
/// 읽기 실패 시 링을 에러 상태로 전환해 소비자를 깨움.
pub fn spawn_file_reader(path: PathBuf, mut producer: RingProducer) -> JoinHandle<()> {
    thread::Builder::new()
        .name("fdp-read-pump".into())
        .spawn(move || {
            let mut file = match File::open(&path) {
                Ok(f) => f,
                Err(e) => {
                    warn!("파일 열기 실패: {:?}: {}", path, e);
                    producer.fail();
                    return;
                }
            };

            loop {
                let slot = producer.slot();
                let mut filled = 0;
                while filled < slot.len() {
                    match file.read(&mut slot[filled..]) {
                        Ok(0) => break,
                        Ok(n) => filled += n,
                        Err(e) => {
                            warn!("파일 읽기 에러: {:?}: {}", path, e);
                            producer.fail();
                            return;
                        }
                    }
                }

                let block_size = producer.block_size();
                if filled < block_size {
                    // EOF 도달, 잔여분이 마지막 슬롯
                    let _ = producer.publish(filled, true);
                    return;
                }
                if producer.publish(filled, false).is_err() {
                    // 소비자 쪽이 중단됨, 더 읽을 필요 없음
                    return;
                }
            }
        })
        .expect("펌프 스레드 생성 실패")
}

/// 링 버퍼를 비워 파일에 쓰는 스레드 시작
///
/// 마지막 슬롯까지 쓰고 flush한 뒤 총 바이트 수를 반환.
/// 쓰기 실패 시 링을 에러 상태로 전환해 생산자를 깨움.
pub fn spawn_file_writer(
    file: File,
    mut consumer: RingConsumer,
    write_buffer_size: usize,
) -> JoinHandle<Result<u64>> {
    thread::Builder::new()
        .name("fdp-write-pump".into())
        .spawn(move || {
            let mut out = BufWriter::with_capacity(write_buffer_size, file);
            let mut total = 0u64;

            loop {
                let (data, last) = match consumer.poll() {
                    Ok(x) => x,
                    Err(e) => return Err(e),
                };
                let len = data.len() as u64;

                if let Err(e) = out.write_all(data) {
                    warn!("파일 쓰기 에러: {}", e);
                    consumer.fail();
                    return Err(e.into());
                }
                total += len;
                consumer.release();

                if last {
                    if let Err(e) = out.flush() {
                        warn!("파일 flush 에러: {}", e);
                        consumer.fail();
                        return Err(e.into());
                    }
                    return Ok(total);
                }
            }
        })
        .expect("펌프 스레드 생성 실패")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring::RingBuffer;
    use std::io::Read as _;

    fn copy_through_ring(input: &[u8], depth: usize, block_size: usize) -> Vec<u8> {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.bin");
        let dst = dir.path().join("dst.bin");
        std::fs::write(&src, input).unwrap();

        let (producer, consumer) = RingBuffer::channel(depth, block_size);
        let reader = spawn_file_reader(src, producer);
        let writer = spawn_file_writer(File::create(&dst).unwrap(), consumer, 4096);

        reader.join().unwrap();
        let written = writer.join().unwrap().unwrap();
        assert_eq!(written, input.len() as u64);

        let mut out = Vec::new();
        File::open(&dst).unwrap().read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn test_copy_smaller_than_block() {
        let input: Vec<u8> = (0..100u32).map(|i| (i % 256) as u8).collect();
        assert_eq!(copy_through_ring(&input, 4, 256), input);
    }

    #[test]
    fn test_copy_exact_block_multiple() {
        // 블록 배수 크기: 빈 마지막 슬롯 경로
        let input: Vec<u8> = (0..1024u32).map(|i| (i % 251) as u8).collect();
        assert_eq!(copy_through_ring(&input, 4, 256), input);
    }

    #[test]
    fn test_copy_with_partial_tail() {
        let input: Vec<u8> = (0..1000u32).map(|i| (i % 253) as u8).collect();
        assert_eq!(copy_through_ring(&input, 4, 256), input);
    }

    #[test]
    fn test_copy_empty_file() {
        assert_eq!(copy_through_ring(&[], 4, 256), Vec::<u8>::new());
    }
}
