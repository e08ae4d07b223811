//! 전송 통계
//!
//! 코어는 전송이 끝날 때 레코드 하나를 채널로 흘려보내기만 함.
//! 집계와 일별 CSV 기록은 수집 스레드가 담당.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::Local;
use crossbeam_channel::{unbounded, Sender};
use parking_lot::RwLock;
use tracing::{info, warn};

/// 전송 1건의 결과
#[derive(Debug, Clone)]
pub struct TransferRecord {
    /// 파일 이름
    pub file_name: String,

    /// 전송 바이트 수
    pub bytes: u64,

    /// 소요 시간
    pub elapsed: Duration,

    /// 성공 여부
    pub success: bool,
}

/// 누적 통계
#[derive(Debug, Clone, Default)]
pub struct TransferStats {
    /// 총 전송 시도 수
    pub total_files: u64,

    /// 성공한 전송 수
    pub completed_files: u64,

    /// 실패한 전송 수
    pub failed_files: u64,

    /// 성공 전송의 총 바이트
    pub total_bytes: u64,

    /// 성공 전송의 총 소요 시간
    pub total_elapsed: Duration,
}

impl TransferStats {
    /// 레코드 반영
    pub fn record(&mut self, record: &TransferRecord) {
        self.total_files += 1;
        if record.success {
            self.completed_files += 1;
            self.total_bytes += record.bytes;
            self.total_elapsed += record.elapsed;
        } else {
            self.failed_files += 1;
        }
    }

    /// 평균 처리율 (MiB/s)
    pub fn throughput_mib(&self) -> f64 {
        let secs = self.total_elapsed.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.total_bytes as f64 / 1048576.0 / secs
    }
}

/// 일별 CSV 로그: `date,count,gib` 한 줄씩, 오늘 줄은 갱신
pub struct DailyLog {
    path: PathBuf,
}

impl DailyLog {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// 오늘 날짜 줄에 전송 1건과 GiB를 누적하고 (건수, 누적 GiB)를 반환
    pub fn record(&self, bytes: u64) -> io::Result<(u64, f64)> {
        let today = Local::now().format("%Y-%m-%d").to_string();
        let gib = bytes as f64 / (1024.0 * 1024.0 * 1024.0);

        let contents = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e),
        };

        let mut lines: Vec<String> = contents.lines().map(str::to_string).collect();
        let mut result = (1u64, gib);
        let mut found = false;

        for line in lines.iter_mut() {
            let mut parts = line.splitn(3, ',');
            let (date, count, total) = (parts.next(), parts.next(), parts.next());
            if date == Some(today.as_str()) {
                let count: u64 = count.and_then(|c| c.parse().ok()).unwrap_or(0) + 1;
                let total: f64 = total.and_then(|t| t.parse().ok()).unwrap_or(0.0) + gib;
                *line = format!("{},{},{:.3}", today, count, total);
                result = (count, total);
                found = true;
                break;
            }
        }
        if !found {
            lines.push(format!("{},1,{:.3}", today, gib));
        }

        fs::write(&self.path, lines.join("\n") + "\n")?;
        Ok(result)
    }
}

/// 통계 레코드 송신 핸들 (세션마다 clone해서 전달)
#[derive(Clone)]
pub struct StatsSink {
    tx: Sender<TransferRecord>,
}

impl StatsSink {
    /// 레코드 제출. 수집 스레드가 내려가 있어도 세션은 실패시키지 않음
    pub fn submit(&self, record: TransferRecord) {
        let _ = self.tx.send(record);
    }
}

/// 통계 수집기: 채널을 비우는 백그라운드 스레드 + 공유 집계
pub struct StatsCollector {
    sink: StatsSink,
    stats: Arc<RwLock<TransferStats>>,
    handle: JoinHandle<()>,
}

impl StatsCollector {
    /// 수집 스레드 시작. `daily_log`가 있으면 일별 CSV도 기록
    pub fn start(daily_log: Option<PathBuf>) -> Self {
        let (tx, rx) = unbounded::<TransferRecord>();
        let stats = Arc::new(RwLock::new(TransferStats::default()));
        let stats_thread = stats.clone();
        let log = daily_log.map(DailyLog::new);

        let handle = thread::Builder::new()
            .name("fdp-stats".into())
            .spawn(move || {
                for record in rx {
                    stats_thread.write().record(&record);

                    if record.success {
                        if let Some(log) = &log {
                            match log.record(record.bytes) {
                                Ok((count, gib)) => info!(
                                    "Daily Stats | Count: {} | Transferred: {:.3} GiB",
                                    count, gib
                                ),
                                Err(e) => warn!("일별 통계 기록 실패: {}", e),
                            }
                        }
                    }
                }
            })
            .expect("통계 스레드 생성 실패");

        Self {
            sink: StatsSink { tx },
            stats,
            handle,
        }
    }

    /// 세션에 전달할 송신 핸들
    pub fn sink(&self) -> StatsSink {
        self.sink.clone()
    }

    /// 현재 집계 스냅샷
    pub fn snapshot(&self) -> TransferStats {
        self.stats.read().clone()
    }

    /// 남은 레코드를 전부 반영하고 수집 스레드 종료, 최종 집계 반환
    ///
    /// 세션에 나눠준 sink 클론이 전부 drop된 뒤에 호출할 것
    pub fn shutdown(self) -> TransferStats {
        drop(self.sink);
        let _ = self.handle.join();
        self.stats.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(bytes: u64, success: bool) -> TransferRecord {
        TransferRecord {
            file_name: "x.bin".into(),
            bytes,
            elapsed: Duration::from_secs(2),
            success,
        }
    }

    #[test]
    fn test_aggregate_counts() {
        let mut stats = TransferStats::default();
        stats.record(&record(1048576, true));
        stats.record(&record(1048576, true));
        stats.record(&record(999, false));

        assert_eq!(stats.total_files, 3);
        assert_eq!(stats.completed_files, 2);
        assert_eq!(stats.failed_files, 1);
        assert_eq!(stats.total_bytes, 2 * 1048576);
        assert!((stats.throughput_mib() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_daily_log_accumulates_today() {
        let dir = tempfile::tempdir().unwrap();
        let log = DailyLog::new(dir.path().join("transfer_stats.csv"));

        let gib = 1024u64 * 1024 * 1024;
        let (count, total) = log.record(gib).unwrap();
        assert_eq!(count, 1);
        assert!((total - 1.0).abs() < 1e-9);

        let (count, total) = log.record(2 * gib).unwrap();
        assert_eq!(count, 2);
        assert!((total - 3.0).abs() < 1e-3);

        let contents = fs::read_to_string(dir.path().join("transfer_stats.csv")).unwrap();
        assert_eq!(contents.lines().count(), 1);
    }

    #[test]
    fn test_collector_receives_records() {
        let collector = StatsCollector::start(None);
        let sink = collector.sink();

        sink.submit(record(100, true));
        sink.submit(record(200, false));

        // 수집 스레드가 처리할 시간
        for _ in 0..50 {
            if collector.snapshot().total_files == 2 {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        let stats = collector.snapshot();
        assert_eq!(stats.total_files, 2);
        assert_eq!(stats.completed_files, 1);
    }
}
