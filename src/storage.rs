//! 存储目录：文件名校验、元数据旁路文件命名与目录枚举。

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::ffi::{OsStr, OsString};
use std::io;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::ErrorKind;
use tracing::debug;

use crate::atomic::is_temp_name;
use crate::config::{METADATA_SUFFIX, PUBLIC_PATH_PREFIX};

#[derive(Clone, Debug)]
pub struct Storage {
    root: PathBuf,
}

/// Metadata persisted next to each stored file as `<name>.metadata`.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct MetadataRecord {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub filename: String,
}

/// One row of the `/files` listing.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FileSummary {
    pub file_name: String,
    pub file_path: String,
    pub title: String,
    pub description: String,
}

impl Storage {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub async fn ensure_root(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root).await
    }

    pub fn root_path(&self) -> &Path {
        &self.root
    }

    /// 将客户端提供的文件名解析为存储根目录下的直接子路径。
    ///
    /// 只接受单个普通路径分量；元数据旁路名与写入中的临时文件名同样拒绝，
    /// 否则它们会在列表中被隐藏或覆盖其他文件的元数据。
    pub async fn resolve_file_name(&self, name: &str) -> Result<PathBuf, StorageError> {
        validate_file_name(name)?;
        let target = self.root.join(name);
        match fs::symlink_metadata(&target).await {
            Ok(metadata) if metadata.file_type().is_symlink() => Err(StorageError::InvalidPath),
            Ok(_) => Ok(target),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(target),
            Err(err) => Err(StorageError::Io(err)),
        }
    }

    /// 枚举根目录（不递归），并为每个文件配上其元数据。
    pub async fn list_summaries(&self) -> Result<Vec<FileSummary>, StorageError> {
        let mut dir = fs::read_dir(&self.root).await?;
        let mut names = Vec::new();

        while let Some(entry) = dir.next_entry().await? {
            let raw = entry.file_name();
            let name = raw.to_string_lossy().to_string();
            if is_sidecar_name(&name) || is_temp_name(&name) {
                continue;
            }
            if raw.to_str().is_none() {
                debug!(name, "listing non-utf8 file name lossily");
            }
            names.push((name, raw));
        }
        names.sort();

        let mut summaries = Vec::with_capacity(names.len());
        for (name, raw) in names {
            let metadata = self.read_metadata(&raw).await.unwrap_or_default();
            summaries.push(FileSummary {
                file_path: format!("{PUBLIC_PATH_PREFIX}{name}"),
                file_name: name,
                title: metadata.title,
                description: metadata.description,
            });
        }

        Ok(summaries)
    }

    /// 读取 `<name>.metadata`；缺失或不是 JSON 时返回 `None`。
    ///
    /// 字段逐个提取，非字符串字段按空串处理，不影响其余字段。
    pub async fn read_metadata(&self, name: &OsStr) -> Option<MetadataRecord> {
        let path = sidecar_path(&self.root.join(name));
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) => {
                if err.kind() != ErrorKind::NotFound {
                    debug!(path = ?path, error = %err, "metadata unreadable");
                }
                return None;
            }
        };
        let value: Value = match serde_json::from_slice(&bytes) {
            Ok(value) => value,
            Err(err) => {
                debug!(path = ?path, error = %err, "metadata is not valid json");
                return None;
            }
        };
        let text = |key: &str| {
            value
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        Some(MetadataRecord {
            title: text("title"),
            description: text("description"),
            filename: text("filename"),
        })
    }
}

/// 面向客户端展示的服务器路径：去掉开头的 `./`。
pub fn display_path(path: &Path) -> String {
    path.components()
        .filter(|component| !matches!(component, Component::CurDir))
        .collect::<PathBuf>()
        .display()
        .to_string()
}

/// 旁路文件路径：在文件名后追加后缀，而不是替换扩展名。
pub fn sidecar_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(METADATA_SUFFIX);
    PathBuf::from(name)
}

pub fn is_sidecar_name(name: &str) -> bool {
    name.ends_with(METADATA_SUFFIX)
}

fn validate_file_name(name: &str) -> Result<(), StorageError> {
    if name.is_empty() || name.contains(['/', '\\']) {
        return Err(StorageError::InvalidPath);
    }
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => {}
        _ => return Err(StorageError::InvalidPath),
    }
    if is_sidecar_name(name) || is_temp_name(name) {
        return Err(StorageError::InvalidPath);
    }
    Ok(())
}

#[derive(Debug)]
pub enum StorageError {
    InvalidPath,
    Io(io::Error),
}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> Self {
        StorageError::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn make_storage() -> (tempfile::TempDir, Storage) {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("uploads");
        std::fs::create_dir_all(&root).expect("create storage root");
        (temp, Storage::new(root))
    }

    #[tokio::test]
    async fn resolve_rejects_traversal_and_reserved_names() {
        let (_temp, storage) = make_storage();
        for name in [
            "",
            ".",
            "..",
            "../secret.txt",
            "nested/file.txt",
            "nested\\file.txt",
            "/etc/passwd",
            "report.txt.metadata",
            ".report.txt.tmp.0b6a5c9e-5a41-4a3f-9a7e-0c1d2e3f4a5b",
        ] {
            let result = storage.resolve_file_name(name).await;
            assert!(
                matches!(result, Err(StorageError::InvalidPath)),
                "{name:?} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn resolve_accepts_plain_names() {
        let (_temp, storage) = make_storage();
        let path = storage
            .resolve_file_name("report.txt")
            .await
            .expect("plain name");
        assert_eq!(path, storage.root_path().join("report.txt"));
        assert!(storage.resolve_file_name(".hidden").await.is_ok());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn resolve_rejects_symlink_leaf() {
        use std::os::unix::fs::symlink;

        let (temp, storage) = make_storage();
        let outside = temp.path().join("outside.txt");
        std::fs::write(&outside, b"secret").expect("write outside file");
        symlink(&outside, storage.root_path().join("link")).expect("symlink");

        let result = storage.resolve_file_name("link").await;
        assert!(matches!(result, Err(StorageError::InvalidPath)));
    }

    #[test]
    fn sidecar_path_appends_suffix() {
        let path = sidecar_path(Path::new("uploads/archive.tar.gz"));
        assert_eq!(path, PathBuf::from("uploads/archive.tar.gz.metadata"));
    }

    #[tokio::test]
    async fn listing_pairs_files_with_sidecars() {
        let (_temp, storage) = make_storage();
        let root = storage.root_path();
        std::fs::write(root.join("b.txt"), b"b").expect("write b");
        std::fs::write(root.join("a.txt"), b"a").expect("write a");
        std::fs::write(
            root.join("a.txt.metadata"),
            br#"{"title":"A","description":"first","filename":"a.txt"}"#,
        )
        .expect("write sidecar");

        let summaries = storage.list_summaries().await.expect("list");
        assert_eq!(
            summaries,
            vec![
                FileSummary {
                    file_name: "a.txt".into(),
                    file_path: "/uploads/a.txt".into(),
                    title: "A".into(),
                    description: "first".into(),
                },
                FileSummary {
                    file_name: "b.txt".into(),
                    file_path: "/uploads/b.txt".into(),
                    title: String::new(),
                    description: String::new(),
                },
            ]
        );
    }

    #[tokio::test]
    async fn listing_tolerates_corrupt_sidecar() {
        let (_temp, storage) = make_storage();
        let root = storage.root_path();
        std::fs::write(root.join("c.bin"), b"c").expect("write file");
        std::fs::write(root.join("c.bin.metadata"), b"{not json").expect("write sidecar");

        let summaries = storage.list_summaries().await.expect("list");
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].file_name, "c.bin");
        assert!(summaries[0].title.is_empty());
        assert!(summaries[0].description.is_empty());
    }

    #[tokio::test]
    async fn listing_keeps_string_fields_next_to_bad_ones() {
        let (_temp, storage) = make_storage();
        let root = storage.root_path();
        std::fs::write(root.join("one.txt"), b"1").expect("write file");
        std::fs::write(
            root.join("one.txt.metadata"),
            br#"{"title":"T","description":"D","filename":null}"#,
        )
        .expect("write sidecar");
        std::fs::write(root.join("two.txt"), b"2").expect("write file");
        std::fs::write(
            root.join("two.txt.metadata"),
            br#"{"title":"T2","description":null}"#,
        )
        .expect("write sidecar");
        std::fs::write(root.join("three.txt"), b"3").expect("write file");
        std::fs::write(
            root.join("three.txt.metadata"),
            br#"{"title":7,"description":"D3"}"#,
        )
        .expect("write sidecar");

        let summaries = storage.list_summaries().await.expect("list");
        let rows: Vec<_> = summaries
            .iter()
            .map(|s| (s.file_name.as_str(), s.title.as_str(), s.description.as_str()))
            .collect();
        assert_eq!(
            rows,
            vec![
                ("one.txt", "T", "D"),
                ("three.txt", "", "D3"),
                ("two.txt", "T2", ""),
            ]
        );
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn listing_finds_sidecar_of_non_utf8_name() {
        use std::os::unix::ffi::OsStrExt;

        let (_temp, storage) = make_storage();
        let root = storage.root_path();
        let name = OsStr::from_bytes(b"caf\xe9.txt");
        std::fs::write(root.join(name), b"x").expect("write file");
        std::fs::write(
            sidecar_path(&root.join(name)),
            br#"{"title":"Cafe","description":"latin1","filename":""}"#,
        )
        .expect("write sidecar");

        let summaries = storage.list_summaries().await.expect("list");
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].file_name, "caf\u{fffd}.txt");
        assert_eq!(summaries[0].title, "Cafe");
        assert_eq!(summaries[0].description, "latin1");
    }

    #[test]
    fn display_path_drops_leading_cur_dir() {
        assert_eq!(
            display_path(Path::new("./uploads/report.txt")),
            "uploads/report.txt"
        );
        assert_eq!(
            display_path(Path::new("/srv/uploads/report.txt")),
            "/srv/uploads/report.txt"
        );
    }

    #[tokio::test]
    async fn listing_hides_in_flight_temp_files() {
        let (_temp, storage) = make_storage();
        let root = storage.root_path();
        std::fs::write(root.join("done.txt"), b"ok").expect("write file");
        std::fs::write(
            root.join(".done.txt.tmp.0b6a5c9e-5a41-4a3f-9a7e-0c1d2e3f4a5b"),
            b"partial",
        )
        .expect("write temp");

        let summaries = storage.list_summaries().await.expect("list");
        let names: Vec<_> = summaries.iter().map(|s| s.file_name.as_str()).collect();
        assert_eq!(names, vec!["done.txt"]);
    }

    #[tokio::test]
    async fn listing_missing_root_is_an_error() {
        let temp = tempdir().expect("tempdir");
        let storage = Storage::new(temp.path().join("absent"));
        assert!(matches!(
            storage.list_summaries().await,
            Err(StorageError::Io(_))
        ));
    }
}
