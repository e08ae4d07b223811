//! 수신 경로 선택
//!
//! - 후보 디렉토리 중 가용 공간이 가장 큰 곳을 선택
//! - 공간 부족 시 삭제 후보 디렉토리에서 파일을 지워 공간 확보
//! - 공간 조회에 실패한 경로는 목록에서 영구 제거 (다음 replace_list까지)
//! - 예약/삭제/재확인은 전부 하나의 임계 구역 안에서 수행됨

use std::fs;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::registry::TransferRegistry;
use crate::Config;

/// 디렉토리 가용 공간 조회
///
/// 셀렉터 테스트에서 가짜 용량을 주입하기 위한 유일한 추상화 지점
pub trait SpaceProbe: Send + Sync {
    fn usable_space(&self, path: &Path) -> io::Result<u64>;
}

/// 실제 파일시스템 조회 (fs2)
pub struct FsProbe;

impl SpaceProbe for FsProbe {
    fn usable_space(&self, path: &Path) -> io::Result<u64> {
        fs2::available_space(path)
    }
}

/// 수신 경로 선택기
pub struct ActivePaths {
    /// 후보 디렉토리 목록. Mutex가 예약 전체의 임계 구역을 겸함
    path_list: Mutex<Vec<PathBuf>>,

    /// 진행 중 전송 레지스트리 (수신 루프와 공유)
    registry: Arc<TransferRegistry>,

    /// 공간 조회
    probe: Box<dyn SpaceProbe>,

    /// 디렉토리당 동시 전송 1개 제한
    one_transfer_per_directory: bool,

    /// 동명 파일 덮어쓰기 허용
    overwrite_existing: bool,

    /// 공간 부족 시 삭제 허용
    delete_for_space: bool,

    /// 삭제 후보 디렉토리
    deletion_directories: Vec<PathBuf>,

    /// 삭제 허용 확장자
    deleted_file_types: Vec<String>,

    /// 삭제 최소 파일 크기
    deletion_threshold: u64,
}

impl ActivePaths {
    /// 설정 스냅샷으로 선택기 생성 (실제 파일시스템 조회)
    pub fn new(config: &Config, registry: Arc<TransferRegistry>) -> Self {
        Self::with_probe(config, registry, Box::new(FsProbe))
    }

    /// 공간 조회 구현을 주입해 생성
    pub fn with_probe(
        config: &Config,
        registry: Arc<TransferRegistry>,
        probe: Box<dyn SpaceProbe>,
    ) -> Self {
        let paths = Self {
            path_list: Mutex::new(Vec::new()),
            registry,
            probe,
            one_transfer_per_directory: config.one_transfer_per_directory,
            overwrite_existing: config.overwrite_existing,
            delete_for_space: config.delete_for_space,
            deletion_directories: config.deletion_directories.clone(),
            deleted_file_types: config.deleted_file_types.clone(),
            deletion_threshold: config.deletion_threshold,
        };
        paths.replace_list(config.output_directories.clone());
        paths
    }

    /// 후보 디렉토리 목록 교체 (설정 리로드 시, 새 세션에만 적용)
    pub fn replace_list(&self, paths: Vec<PathBuf>) {
        let mut list = self.path_list.lock();
        list.clear();
        for path in paths {
            if path.is_dir() {
                list.push(path);
            } else {
                warn!("존재하지 않는 경로, 건너뜀: {:?}", path);
            }
        }
    }

    /// 현재 후보 디렉토리 수
    pub fn path_count(&self) -> usize {
        self.path_list.lock().len()
    }

    /// 수신 경로 예약
    ///
    /// 성공 시 임시 경로(`<dir>/<name>.tmp`)를 반환하고 레지스트리에
    /// 등록함. 거부(None)는 에러가 아니라 예상되는 결과임.
    /// 성공/실패 어느 쪽이든 전송이 끝나면 `release`를 정확히 한 번 호출할 것.
    pub fn reserve(
        &self,
        file_name: &str,
        file_size: u64,
        source: Option<SocketAddr>,
    ) -> Option<PathBuf> {
        let mut list = self.path_list.lock();

        if self.registry.contains(file_name) {
            warn!("이미 진행 중인 전송: {}", file_name);
            return None;
        }

        let mut chosen = self.most_free(&mut list, file_size);
        if chosen.is_none() && self.delete_for_space {
            self.delete_for_free_space(file_size);
            chosen = self.most_free(&mut list, file_size);
        }
        let dir = chosen?;

        let final_path = dir.join(file_name);
        if !self.overwrite_existing && final_path.exists() {
            return None;
        }

        self.registry.insert(file_name, dir.clone(), source);
        Some(dir.join(format!("{}.tmp", file_name)))
    }

    /// 예약 해제 (멱등)
    pub fn release(&self, file_name: &str) {
        self.registry.remove(file_name);
    }

    fn eligible(&self, path: &Path) -> bool {
        path.is_dir()
            && (!self.one_transfer_per_directory || !self.registry.directory_in_use(path))
    }

    /// 가용 공간이 file_size를 초과하는 디렉토리 중 최대 공간인 것
    ///
    /// 조회에 실패한 경로는 목록에서 제거함
    fn most_free(&self, path_list: &mut Vec<PathBuf>, file_size: u64) -> Option<PathBuf> {
        let mut best: Option<(PathBuf, u64)> = None;
        let mut bad_paths: Vec<PathBuf> = Vec::new();

        for path in path_list.iter() {
            if !self.eligible(path) {
                continue;
            }
            match self.probe.usable_space(path) {
                Ok(space) => {
                    if space > file_size && best.as_ref().map_or(true, |(_, b)| space > *b) {
                        best = Some((path.clone(), space));
                    }
                }
                Err(e) => {
                    warn!("경로 제거: {:?} 사유: 공간 조회 실패 ({})", path, e);
                    bad_paths.push(path.clone());
                }
            }
        }

        if !bad_paths.is_empty() {
            path_list.retain(|p| !bad_paths.contains(p));
        }
        best.map(|(path, _)| path)
    }

    /// 삭제 후보 디렉토리에서 필요한 만큼만 파일 삭제
    ///
    /// 디렉토리 내 처리 순서는 파일 이름 정렬 순으로 결정적.
    /// 파일 하나 처리할 때마다 공간을 재확인하고 충분해지면 즉시 중단함.
    fn delete_for_free_space(&self, file_size: u64) {
        for dir in &self.deletion_directories {
            if !self.eligible(dir) {
                continue;
            }
            if matches!(self.probe.usable_space(dir), Ok(space) if space > file_size) {
                return;
            }

            let entries = match fs::read_dir(dir) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("삭제 후보 디렉토리 접근 실패: {:?}: {}", dir, e);
                    continue;
                }
            };
            let mut files: Vec<PathBuf> = entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_file())
                .collect();
            files.sort();

            for file in files {
                if self.deletable(&file) {
                    match fs::remove_file(&file) {
                        Ok(()) => info!("공간 확보 위해 파일 삭제: {:?}", file),
                        Err(e) => {
                            warn!("파일 삭제 에러: {:?}: {}", file, e);
                            continue;
                        }
                    }
                }
                if matches!(self.probe.usable_space(dir), Ok(space) if space > file_size) {
                    return;
                }
            }
        }
    }

    fn deletable(&self, file: &Path) -> bool {
        let ext_allowed = file
            .extension()
            .and_then(|e| e.to_str())
            .map_or(false, |ext| self.deleted_file_types.iter().any(|t| t == ext));
        if !ext_allowed {
            return false;
        }
        fs::metadata(file).map_or(false, |m| m.len() >= self.deletion_threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    /// 경로별 고정 용량을 돌려주는 가짜 조회
    struct MapProbe(HashMap<PathBuf, u64>);

    impl SpaceProbe for MapProbe {
        fn usable_space(&self, path: &Path) -> io::Result<u64> {
            self.0
                .get(path)
                .copied()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no quota"))
        }
    }

    /// quota에서 디렉토리 내 파일 크기 합을 뺀 값을 돌려주는 조회
    /// (삭제가 실제로 공간을 늘리는 것처럼 보이게 함)
    struct QuotaProbe {
        quota: u64,
    }

    impl SpaceProbe for QuotaProbe {
        fn usable_space(&self, path: &Path) -> io::Result<u64> {
            let used: u64 = fs::read_dir(path)?
                .filter_map(|e| e.ok())
                .filter_map(|e| e.metadata().ok())
                .filter(|m| m.is_file())
                .map(|m| m.len())
                .sum();
            Ok(self.quota.saturating_sub(used))
        }
    }

    fn three_dirs() -> (TempDir, TempDir, TempDir) {
        (
            tempfile::tempdir().unwrap(),
            tempfile::tempdir().unwrap(),
            tempfile::tempdir().unwrap(),
        )
    }

    fn selector_with(
        dirs: Vec<PathBuf>,
        probe: Box<dyn SpaceProbe>,
        mutate: impl FnOnce(&mut Config),
    ) -> (ActivePaths, Arc<TransferRegistry>) {
        let mut config = Config {
            output_directories: dirs,
            ..Config::default()
        };
        mutate(&mut config);
        let registry = Arc::new(TransferRegistry::new());
        let paths = ActivePaths::with_probe(&config, registry.clone(), probe);
        (paths, registry)
    }

    #[test]
    fn test_picks_directory_with_most_space() {
        let (a, b, c) = three_dirs();
        let probe = MapProbe(HashMap::from([
            (a.path().to_path_buf(), 10),
            (b.path().to_path_buf(), 50),
            (c.path().to_path_buf(), 5),
        ]));
        let dirs = vec![
            a.path().to_path_buf(),
            b.path().to_path_buf(),
            c.path().to_path_buf(),
        ];
        let (paths, registry) = selector_with(dirs, Box::new(probe), |_| {});

        let reserved = paths.reserve("x.bin", 20, None).unwrap();
        assert_eq!(reserved, b.path().join("x.bin.tmp"));
        assert!(registry.contains("x.bin"));

        paths.release("x.bin");
        assert!(registry.is_empty());
    }

    #[test]
    fn test_exclusivity_blocks_busy_directory() {
        let (a, b, c) = three_dirs();
        let probe = MapProbe(HashMap::from([
            (a.path().to_path_buf(), 10),
            (b.path().to_path_buf(), 50),
            (c.path().to_path_buf(), 5),
        ]));
        let dirs = vec![
            a.path().to_path_buf(),
            b.path().to_path_buf(),
            c.path().to_path_buf(),
        ];
        let (paths, registry) = selector_with(dirs, Box::new(probe), |c| {
            c.one_transfer_per_directory = true;
        });

        // 가장 큰 디렉토리가 이미 점유된 상태
        registry.insert("busy.bin", b.path().to_path_buf(), None);

        // 10과 5짜리는 20에 부족하므로 거부
        assert!(paths.reserve("x.bin", 20, None).is_none());
        assert!(!registry.contains("x.bin"));
    }

    #[test]
    fn test_failing_probe_removes_path_permanently() {
        let (a, b, _c) = three_dirs();
        let probe = MapProbe(HashMap::from([(b.path().to_path_buf(), 50)]));
        let dirs = vec![a.path().to_path_buf(), b.path().to_path_buf()];
        let (paths, _registry) = selector_with(dirs, Box::new(probe), |_| {});

        assert_eq!(paths.path_count(), 2);
        let reserved = paths.reserve("x.bin", 20, None).unwrap();
        assert_eq!(reserved, b.path().join("x.bin.tmp"));
        assert_eq!(paths.path_count(), 1);
    }

    #[test]
    fn test_name_collision_without_overwrite() {
        let (a, _b, _c) = three_dirs();
        fs::write(a.path().join("x.bin"), b"existing").unwrap();
        let probe = MapProbe(HashMap::from([(a.path().to_path_buf(), 1000)]));
        let (paths, registry) = selector_with(
            vec![a.path().to_path_buf()],
            Box::new(probe),
            |c| c.overwrite_existing = false,
        );

        assert!(paths.reserve("x.bin", 20, None).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_duplicate_in_flight_name_refused() {
        let (a, _b, _c) = three_dirs();
        let probe = MapProbe(HashMap::from([(a.path().to_path_buf(), 1000)]));
        let (paths, _registry) =
            selector_with(vec![a.path().to_path_buf()], Box::new(probe), |_| {});

        assert!(paths.reserve("x.bin", 20, None).is_some());
        assert!(paths.reserve("x.bin", 20, None).is_none());
    }

    #[test]
    fn test_eviction_deletes_only_what_is_needed() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["f1.bak", "f2.bak", "f3.bak"] {
            fs::write(dir.path().join(name), [0u8; 3]).unwrap();
        }

        // quota 11, 사용 중 9 → 가용 2. 7바이트 필요: 파일 2개 삭제 후 가용 8 > 7
        let probe = QuotaProbe { quota: 11 };
        let (paths, _registry) = selector_with(
            vec![dir.path().to_path_buf()],
            Box::new(probe),
            |c| {
                c.delete_for_space = true;
                c.deletion_directories = vec![dir.path().to_path_buf()];
                c.deleted_file_types = vec!["bak".into()];
                c.deletion_threshold = 1;
            },
        );

        let reserved = paths.reserve("x.bin", 7, None);
        assert!(reserved.is_some());

        let remaining = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_file())
            .count();
        assert_eq!(remaining, 1, "필요 이상으로 삭제하면 안 됨");
    }

    #[test]
    fn test_eviction_skips_files_outside_allow_list() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("keep.dat"), [0u8; 3]).unwrap();
        fs::write(dir.path().join("old.bak"), [0u8; 3]).unwrap();

        let probe = QuotaProbe { quota: 8 };
        let (paths, _registry) = selector_with(
            vec![dir.path().to_path_buf()],
            Box::new(probe),
            |c| {
                c.delete_for_space = true;
                c.deletion_directories = vec![dir.path().to_path_buf()];
                c.deleted_file_types = vec!["bak".into()];
                c.deletion_threshold = 1;
            },
        );

        // 가용 2 → old.bak만 삭제 → 가용 5 > 4
        assert!(paths.reserve("x.bin", 4, None).is_some());
        assert!(dir.path().join("keep.dat").exists());
        assert!(!dir.path().join("old.bak").exists());
    }

    #[test]
    fn test_eviction_never_touches_active_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("old.bak"), [0u8; 5]).unwrap();

        let probe = QuotaProbe { quota: 6 };
        let (paths, registry) = selector_with(
            vec![dir.path().to_path_buf()],
            Box::new(probe),
            |c| {
                c.one_transfer_per_directory = true;
                c.delete_for_space = true;
                c.deletion_directories = vec![dir.path().to_path_buf()];
                c.deleted_file_types = vec!["bak".into()];
                c.deletion_threshold = 1;
            },
        );

        registry.insert("busy.bin", dir.path().to_path_buf(), None);

        assert!(paths.reserve("x.bin", 4, None).is_none());
        assert!(dir.path().join("old.bak").exists(), "점유된 디렉토리는 건드리지 않음");
    }
}
