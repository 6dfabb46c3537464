//! 会话协议版本与版本默认值。
//!
//! 版本号既出现在持久化的会话描述符里，也出现在远端初始化请求中；
//! 套接字策略字段的"默认值"在这里落地为具体取值，使配置合并可以把
//! "未指定"一路透传到应用时刻。

use serde::{Deserialize, Serialize};

use crate::configuration::SocketOverwriteMode;
use crate::error::SessionError;

/// 转发会话协议版本。
///
/// # 教案式说明
/// - **契约 (What)**：当前仅支持版本 1；反序列化阶段即拒绝其他数值，
///   因此持有 [`Version`] 值本身就意味着版本受支持；
/// - **风险 (Trade-offs)**：新增版本时必须同步审视各字段默认值是否
///   随版本变化，默认值函数以 `self` 分派正是为此预留。
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(into = "u32", try_from = "u32")]
pub enum Version {
    /// 初始协议版本。
    V1,
}

impl Version {
    /// 判断数值版本是否受支持。
    pub fn supported(version: u32) -> bool {
        version == 1
    }

    /// 数值形态。
    pub fn number(self) -> u32 {
        match self {
            Version::V1 => 1,
        }
    }

    /// 版本默认的残留套接字处置策略。
    pub fn default_socket_overwrite_mode(self) -> SocketOverwriteMode {
        match self {
            Version::V1 => SocketOverwriteMode::Leave,
        }
    }

    /// 版本默认的套接字属主说明符（空串 = 继承进程身份）。
    pub fn default_socket_owner(self) -> &'static str {
        match self {
            Version::V1 => "",
        }
    }

    /// 版本默认的套接字属组说明符（空串 = 继承进程身份）。
    pub fn default_socket_group(self) -> &'static str {
        match self {
            Version::V1 => "",
        }
    }

    /// 版本默认的套接字权限位。
    pub fn default_socket_permission_mode(self) -> u32 {
        match self {
            Version::V1 => 0o600,
        }
    }
}

impl From<Version> for u32 {
    fn from(version: Version) -> u32 {
        version.number()
    }
}

impl TryFrom<u32> for Version {
    type Error = SessionError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Version::V1),
            _ => Err(SessionError::UnsupportedVersion { version: value }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_version_one_is_supported() {
        assert!(Version::supported(1));
        assert!(!Version::supported(0));
        assert!(!Version::supported(2));
        assert!(Version::try_from(1).is_ok());
        assert!(Version::try_from(7).is_err());
    }

    #[test]
    fn version_one_defaults() {
        let version = Version::V1;
        assert_eq!(
            version.default_socket_overwrite_mode(),
            SocketOverwriteMode::Leave
        );
        assert_eq!(version.default_socket_owner(), "");
        assert_eq!(version.default_socket_group(), "");
        assert_eq!(version.default_socket_permission_mode(), 0o600);
    }
}
