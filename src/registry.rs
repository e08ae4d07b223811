//! 진행 중 전송 레지스트리
//!
//! 파일 이름 → {수신 디렉토리, 송신측 주소}. 같은 이름의 전송이 겹치지
//! 않게 막고, 배타 정책에서 디렉토리 점유 여부를 판정하는 데 쓰임.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use dashmap::DashMap;

/// 전송 항목
#[derive(Debug, Clone)]
pub struct TransferEntry {
    /// 선택된 수신 디렉토리 (송신측에서는 빈 경로)
    pub directory: PathBuf,

    /// 송신측 주소 (수신측에서만 기록)
    pub source: Option<SocketAddr>,
}

/// 전송 레지스트리
#[derive(Debug, Default)]
pub struct TransferRegistry {
    entries: DashMap<String, TransferEntry>,
}

impl TransferRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 항목 등록. 이미 같은 이름이 있으면 false
    pub fn insert(&self, file_name: &str, directory: PathBuf, source: Option<SocketAddr>) -> bool {
        if self.entries.contains_key(file_name) {
            return false;
        }
        self.entries
            .insert(file_name.to_string(), TransferEntry { directory, source });
        true
    }

    /// 항목 제거. 이미 없는 항목 제거는 no-op (멱등)
    pub fn remove(&self, file_name: &str) {
        self.entries.remove(file_name);
    }

    /// 이름이 진행 중인지 여부
    pub fn contains(&self, file_name: &str) -> bool {
        self.entries.contains_key(file_name)
    }

    /// 디렉토리가 진행 중인 전송의 목적지인지 여부
    pub fn directory_in_use(&self, dir: &Path) -> bool {
        self.entries.iter().any(|e| e.value().directory == dir)
    }

    /// 진행 중 전송 수
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_insert_refused() {
        let registry = TransferRegistry::new();
        assert!(registry.insert("a.bin", PathBuf::from("/data"), None));
        assert!(!registry.insert("a.bin", PathBuf::from("/other"), None));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_release_is_idempotent() {
        let registry = TransferRegistry::new();
        registry.insert("a.bin", PathBuf::from("/data"), None);

        registry.remove("a.bin");
        registry.remove("a.bin"); // 두 번째 제거는 no-op
        assert!(registry.is_empty());
    }

    #[test]
    fn test_directory_in_use() {
        let registry = TransferRegistry::new();
        registry.insert("a.bin", PathBuf::from("/data"), None);

        assert!(registry.directory_in_use(Path::new("/data")));
        assert!(!registry.directory_in_use(Path::new("/other")));
    }
}
