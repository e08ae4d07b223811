//! SPSC 링 버퍼
//!
//! - 슬롯별 상태 플래그 (FREE → FILLING → READY → FREE)로 소유권 이동
//! - 락 없이 스핀 대기만 사용, 짧은 핸드오프 전제
//! - 생산자 스레드 1개 + 소비자 스레드 1개 고정
//! - 마지막 슬롯의 유효 길이는 슬롯 용량과 별도로 전달됨

use std::cell::UnsafeCell;
use std::hint;
use std::sync::atomic::{AtomicBool, AtomicI8, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use crate::{Error, Result};

/// 슬롯 비어 있음, 생산자가 써도 됨
const FREE: u8 = 0;

/// 생산자가 채우는 중
const FILLING: u8 = 1;

/// 발행 완료, 소비자가 읽어도 됨
const READY: u8 = 2;

/// 정상 동작 중
const STATE_RUNNING: i8 = 1;

/// 정상 종료됨
const STATE_CLOSED: i8 = 0;

/// 상대 스레드의 I/O 실패
const STATE_FAILED: i8 = -1;

/// 스핀 대기 중 yield로 전환하는 반복 횟수
const SPIN_LIMIT: u32 = 64;

/// 링 버퍼 공유 상태
///
/// 슬롯 접근 규칙: FILLING 슬롯은 생산자만, READY 슬롯은 소비자만 만짐.
/// 플래그 전이가 acquire/release로 가시성을 보장하므로 같은 슬롯을
/// 두 스레드가 동시에 접근하는 일은 없음.
pub struct RingBuffer {
    slots: Vec<UnsafeCell<Box<[u8]>>>,
    flags: Vec<AtomicU8>,
    head: AtomicUsize,
    tail: AtomicUsize,
    finished: AtomicBool,
    last_index: AtomicUsize,
    last_size: AtomicUsize,
    state: AtomicI8,
    block_size: usize,
    capacity: usize,
}

// SAFETY: 슬롯은 플래그 프로토콜로 단독 접근이 보장됨 (생산자 1, 소비자 1)
unsafe impl Sync for RingBuffer {}
unsafe impl Send for RingBuffer {}

impl RingBuffer {
    /// 생산자/소비자 핸들 쌍 생성
    ///
    /// 슬롯 0은 생성 시점부터 생산자 소유 (FILLING)
    pub fn channel(depth: usize, block_size: usize) -> (RingProducer, RingConsumer) {
        assert!(depth >= 2, "queue depth는 2 이상이어야 함");
        assert!(block_size > 0);

        let slots = (0..depth)
            .map(|_| UnsafeCell::new(vec![0u8; block_size].into_boxed_slice()))
            .collect();
        let flags: Vec<AtomicU8> = (0..depth).map(|_| AtomicU8::new(FREE)).collect();
        flags[0].store(FILLING, Ordering::Relaxed);

        let shared = Arc::new(RingBuffer {
            slots,
            flags,
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            finished: AtomicBool::new(false),
            last_index: AtomicUsize::new(0),
            last_size: AtomicUsize::new(block_size),
            state: AtomicI8::new(STATE_RUNNING),
            block_size,
            capacity: depth,
        });

        (
            RingProducer {
                shared: shared.clone(),
                tail: 0,
            },
            RingConsumer { shared, head: 0 },
        )
    }

    fn check_state(&self) -> Result<()> {
        match self.state.load(Ordering::Acquire) {
            STATE_FAILED => Err(Error::BufferFailed),
            STATE_CLOSED => Err(Error::BufferClosed),
            _ => Ok(()),
        }
    }
}

/// 스핀 한 바퀴: 짧게는 spin_loop, 길어지면 yield
fn backoff(spins: &mut u32) {
    if *spins < SPIN_LIMIT {
        *spins += 1;
        hint::spin_loop();
    } else {
        thread::yield_now();
    }
}

/// 생산자 핸들
///
/// 현재 FILLING 슬롯을 직접 채운 뒤 `publish`로 발행. 슬롯 버퍼는
/// 전송 내내 재사용되며 청크마다 할당하지 않음.
pub struct RingProducer {
    shared: Arc<RingBuffer>,
    tail: usize,
}

impl RingProducer {
    /// 현재 채우는 중인 슬롯의 버퍼
    pub fn slot(&mut self) -> &mut [u8] {
        // SAFETY: tail 슬롯은 FILLING 상태이고 생산자만 접근함
        unsafe { &mut (&mut (*self.shared.slots[self.tail].get()))[..] }
    }

    /// 슬롯 용량 (block_size)
    pub fn block_size(&self) -> usize {
        self.shared.block_size
    }

    /// 현재 슬롯을 발행하고 다음 슬롯을 확보
    ///
    /// `last`면 finished/last_size를 READY 전이보다 먼저 기록해서
    /// 소비자가 마지막 슬롯과 함께 관측하도록 함. 마지막 발행 후에는
    /// 다음 슬롯을 기다리지 않고 즉시 반환함.
    pub fn publish(&mut self, size: usize, last: bool) -> Result<()> {
        debug_assert!(size <= self.shared.block_size);
        let curr = self.tail;

        if last {
            // 마지막 READY 전이보다 먼저 기록해서 소비자가 플래그와 함께 관측
            self.shared.last_size.store(size, Ordering::Release);
            self.shared.last_index.store(curr, Ordering::Release);
            self.shared.finished.store(true, Ordering::Release);
            self.shared
                .tail
                .store((curr + 1) % self.shared.capacity, Ordering::Release);
            self.shared.flags[curr].store(READY, Ordering::Release);
            return Ok(());
        }

        self.shared.flags[curr].store(READY, Ordering::Release);

        let next = (curr + 1) % self.shared.capacity;
        let mut spins = 0;
        while self.shared.flags[next].load(Ordering::Acquire) != FREE {
            self.shared.check_state()?;
            backoff(&mut spins);
        }
        self.shared.check_state()?;

        self.shared.flags[next].store(FILLING, Ordering::Relaxed);
        self.shared.tail.store(next, Ordering::Release);
        self.tail = next;
        Ok(())
    }

    /// I/O 실패 표시, 소비자는 다음 poll에서 에러로 깨어남
    pub fn fail(&self) {
        self.shared.state.store(STATE_FAILED, Ordering::Release);
    }

    /// 정상 종료 표시
    pub fn close(&self) {
        let _ = self.shared.state.compare_exchange(
            STATE_RUNNING,
            STATE_CLOSED,
            Ordering::AcqRel,
            Ordering::Relaxed,
        );
    }

    /// 소비자 쪽 실패 여부 확인 (스트리밍 루프에서 주기적으로 호출)
    pub fn is_failed(&self) -> bool {
        self.shared.state.load(Ordering::Acquire) == STATE_FAILED
    }
}

/// 소비자 핸들
pub struct RingConsumer {
    shared: Arc<RingBuffer>,
    head: usize,
}

impl RingConsumer {
    /// 다음 READY 슬롯을 스핀 대기로 획득
    ///
    /// 반환: (유효 바이트 슬라이스, 마지막 슬롯 여부).
    /// 마지막 슬롯은 last_size만큼만 유효함 (0일 수도 있음).
    /// `release` 호출 전까지는 같은 슬롯을 반환함.
    pub fn poll(&mut self) -> Result<(&[u8], bool)> {
        let curr = self.head;
        let mut spins = 0;
        while self.shared.flags[curr].load(Ordering::Acquire) != READY {
            self.shared.check_state()?;
            backoff(&mut spins);
        }

        // 마지막 슬롯의 READY 전이는 finished/last_index 기록 이후에 일어나므로
        // READY를 본 시점에는 두 값이 모두 보임. 이전 슬롯에서는 curr이
        // last_index와 다르므로 finished의 stale 읽기는 결과에 영향 없음.
        let is_last = self.shared.finished.load(Ordering::Acquire)
            && curr == self.shared.last_index.load(Ordering::Acquire);

        let size = if is_last {
            self.shared.last_size.load(Ordering::Acquire)
        } else {
            self.shared.block_size
        };

        // SAFETY: READY 슬롯은 release될 때까지 소비자만 접근함
        let data = unsafe { &(&(*self.shared.slots[curr].get()))[..size] };
        Ok((data, is_last))
    }

    /// 슬롯 반납, 생산자가 재사용할 수 있게 됨
    ///
    /// 슬롯 내용을 전부 복사/전달한 뒤에만 호출할 것
    pub fn release(&mut self) {
        let curr = self.head;
        self.head = (curr + 1) % self.shared.capacity;
        self.shared.head.store(self.head, Ordering::Release);
        self.shared.flags[curr].store(FREE, Ordering::Release);
    }

    /// I/O 실패 표시, 생산자는 다음 publish에서 에러로 깨어남
    pub fn fail(&self) {
        self.shared.state.store(STATE_FAILED, Ordering::Release);
    }

    /// 정상 종료 표시
    pub fn close(&self) {
        let _ = self.shared.state.compare_exchange(
            STATE_RUNNING,
            STATE_CLOSED,
            Ordering::AcqRel,
            Ordering::Relaxed,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_single_short_block() {
        let (mut producer, mut consumer) = RingBuffer::channel(4, 64);

        producer.slot()[..5].copy_from_slice(b"hello");
        producer.publish(5, true).unwrap();

        let (data, last) = consumer.poll().unwrap();
        assert!(last);
        assert_eq!(data, b"hello");
        consumer.release();
    }

    #[test]
    fn test_zero_length_final_block() {
        // 파일 크기가 블록 크기의 배수면 마지막 발행은 빈 슬롯
        let (mut producer, mut consumer) = RingBuffer::channel(4, 8);

        producer.slot().copy_from_slice(&[7u8; 8]);
        producer.publish(8, false).unwrap();
        producer.publish(0, true).unwrap();

        let (data, last) = consumer.poll().unwrap();
        assert!(!last);
        assert_eq!(data, &[7u8; 8]);
        consumer.release();

        let (data, last) = consumer.poll().unwrap();
        assert!(last);
        assert!(data.is_empty());
        consumer.release();
    }

    #[test]
    fn test_cross_thread_integrity() {
        // 슬롯 수보다 훨씬 많은 블록을 무작위 지연과 함께 흘려보내고
        // 바이트 패턴이 순서대로 보존되는지 확인
        let depth = 4;
        let block_size = 256;
        let blocks = 64usize;
        let (mut producer, mut consumer) = RingBuffer::channel(depth, block_size);

        let writer = thread::spawn(move || {
            for i in 0..blocks {
                let pattern = (i % 251) as u8;
                for b in producer.slot().iter_mut() {
                    *b = pattern;
                }
                if i % 7 == 0 {
                    thread::sleep(Duration::from_micros(50));
                }
                producer.publish(block_size, i == blocks - 1).unwrap();
            }
        });

        for i in 0..blocks {
            let (data, last) = consumer.poll().unwrap();
            assert_eq!(last, i == blocks - 1);
            let pattern = (i % 251) as u8;
            assert!(data.iter().all(|&b| b == pattern), "block {} corrupted", i);
            if i % 5 == 0 {
                thread::sleep(Duration::from_micros(80));
            }
            consumer.release();
        }

        writer.join().unwrap();
    }

    #[test]
    fn test_producer_fail_unblocks_consumer() {
        let (producer, mut consumer) = RingBuffer::channel(2, 16);

        let handle = thread::spawn(move || consumer.poll().map(|_| ()));

        thread::sleep(Duration::from_millis(10));
        producer.fail();

        let result = handle.join().unwrap();
        assert!(matches!(result, Err(Error::BufferFailed)));
    }

    #[test]
    fn test_consumer_fail_unblocks_producer() {
        // 소비자가 슬롯을 비우지 않아 생산자가 가득 찬 링에서 스핀하는 상황
        let (mut producer, consumer) = RingBuffer::channel(2, 16);

        let handle = thread::spawn(move || -> Result<()> {
            loop {
                producer.publish(16, false)?;
            }
        });

        thread::sleep(Duration::from_millis(10));
        consumer.fail();

        let result = handle.join().unwrap();
        assert!(matches!(result, Err(Error::BufferFailed)));
    }

    #[test]
    fn test_close_unblocks_producer() {
        let (mut producer, consumer) = RingBuffer::channel(2, 16);

        let handle = thread::spawn(move || -> Result<()> {
            loop {
                producer.publish(16, false)?;
            }
        });

        thread::sleep(Duration::from_millis(10));
        consumer.close();

        let result = handle.join().unwrap();
        assert!(matches!(result, Err(Error::BufferClosed)));
    }
}
