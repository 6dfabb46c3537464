//! 会话目录：每个会话一个以标识符命名的 JSON 文件。
//!
//! 生命周期：`create` 时写入，管理器启动时加载，暂停/恢复时重写
//! （`paused` 是描述符的一部分），`terminate` 时删除。

use std::io;
use std::path::{Path, PathBuf};

use ferry_core::Session;

/// 会话目录访问器。
#[derive(Debug)]
pub struct SessionStore {
    directory: PathBuf,
}

impl SessionStore {
    /// 在数据根目录下定位（并确保存在）会话目录。
    pub fn new(data_root: &Path) -> io::Result<SessionStore> {
        let directory = data_root.join("forwarding").join("sessions");
        std::fs::create_dir_all(&directory)?;
        Ok(SessionStore { directory })
    }

    fn path_for(&self, identifier: &str) -> PathBuf {
        self.directory.join(identifier)
    }

    /// 写入（或重写）会话描述符。
    pub fn save(&self, session: &Session) -> io::Result<()> {
        let encoded = serde_json::to_vec_pretty(session)
            .map_err(|error| io::Error::new(io::ErrorKind::InvalidData, error))?;
        std::fs::write(self.path_for(&session.identifier), encoded)
    }

    /// 加载一个会话描述符。
    pub fn load(&self, identifier: &str) -> io::Result<Session> {
        let encoded = std::fs::read(self.path_for(identifier))?;
        serde_json::from_slice(&encoded)
            .map_err(|error| io::Error::new(io::ErrorKind::InvalidData, error))
    }

    /// 删除一个会话文件；文件不存在视为成功。
    pub fn delete(&self, identifier: &str) -> io::Result<()> {
        match std::fs::remove_file(self.path_for(identifier)) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error),
        }
    }

    /// 列出目录中的全部条目名（不做语法过滤，调用方自行校验）。
    pub fn list_entries(&self) -> io::Result<Vec<String>> {
        let mut entries = Vec::new();
        for entry in std::fs::read_dir(&self.directory)? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                entries.push(name.to_owned());
            }
        }
        Ok(entries)
    }
}
