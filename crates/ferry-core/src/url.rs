//! # url 模块说明
//!
//! ## 核心意图（Why）
//! - 以结构化形式承载转发 URL：协议标签、可选的用户/主机/端口，以及
//!   `<transport>:<address>` 形态的端点路径；
//! - URL 字符串的完整解析（scheme、user@host:port 等）属于外部协作者，
//!   本模块只负责模型与路径文法。
//!
//! ## 行为契约（What）
//! - 路径在首个 `':'` 处切分；传输标签必须属于
//!   `tcp | tcp4 | tcp6 | unix | npipe`；地址部分非空；
//! - `Local` 协议额外要求 `unix:` 地址为绝对路径；
//! - `environment` / `parameters` 由远端传输处理器消费，本地处理器会在
//!   装配时拒绝携带它们的 URL。

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AddressError;

/// 转发 URL 的协议标签。
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub enum Protocol {
    /// 端点位于本进程。
    Local,
    /// 端点经 SSH 隧道上的代理进程到达。
    Ssh,
    /// 端点位于容器内部，经 exec 通道到达。
    Docker,
    /// 端点经预建隧道到达。
    Tunnel,
}

impl Default for Protocol {
    fn default() -> Self {
        Protocol::Local
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Protocol::Local => "local",
            Protocol::Ssh => "ssh",
            Protocol::Docker => "docker",
            Protocol::Tunnel => "tunnel",
        };
        f.write_str(text)
    }
}

/// 端点路径允许的传输标签。
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub enum Transport {
    /// TCP，由系统选择地址族。
    Tcp,
    /// 仅 IPv4 的 TCP。
    Tcp4,
    /// 仅 IPv6 的 TCP。
    Tcp6,
    /// Unix 域套接字。
    Unix,
    /// Windows 命名管道。
    Npipe,
}

impl Transport {
    /// 线上文本形态。
    pub fn as_str(self) -> &'static str {
        match self {
            Transport::Tcp => "tcp",
            Transport::Tcp4 => "tcp4",
            Transport::Tcp6 => "tcp6",
            Transport::Unix => "unix",
            Transport::Npipe => "npipe",
        }
    }
}

impl FromStr for Transport {
    type Err = AddressError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        match text {
            "tcp" => Ok(Transport::Tcp),
            "tcp4" => Ok(Transport::Tcp4),
            "tcp6" => Ok(Transport::Tcp6),
            "unix" => Ok(Transport::Unix),
            "npipe" => Ok(Transport::Npipe),
            _ => Err(AddressError::UnknownTransport {
                transport: text.to_owned(),
            }),
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 解析后的端点地址：传输标签 + 自由形态地址。
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ForwardingAddress {
    /// 传输标签。
    pub transport: Transport,
    /// 地址文本：TCP 为 `host:port`，unix 为文件系统路径，npipe 为
    /// `\\.\pipe\<name>`。
    pub address: String,
}

impl ForwardingAddress {
    /// 按 `<transport>:<address>` 文法解析路径。
    pub fn parse(path: &str) -> Result<ForwardingAddress, AddressError> {
        let Some((transport, address)) = path.split_once(':') else {
            return Err(AddressError::MissingSeparator {
                path: path.to_owned(),
            });
        };
        let transport = transport.parse::<Transport>()?;
        if address.is_empty() {
            return Err(AddressError::EmptyAddress);
        }
        Ok(ForwardingAddress {
            transport,
            address: address.to_owned(),
        })
    }
}

impl fmt::Display for ForwardingAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.transport, self.address)
    }
}

/// 转发 URL 模型。
///
/// # 教案式说明
/// - **契约 (What)**：
///   - `protocol`：决定由哪个协议处理器装配端点；
///   - `user` / `host` / `port`：远端协议的寻址信息，`Local` 下为空；
///   - `path`：`<transport>:<address>` 端点地址；
///   - `environment` / `parameters`：远端传输处理器的附加输入；
/// - **前置条件**：装配端点前调用
///   [`forwarding_address`](Self::forwarding_address) 完成文法与协议
///   约束校验。
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Url {
    /// 协议标签。
    pub protocol: Protocol,
    /// 远端用户名，可为空。
    pub user: String,
    /// 远端主机，可为空。
    pub host: String,
    /// 远端端口，`0` 表示未指定。
    pub port: u16,
    /// 端点路径（`<transport>:<address>`）。
    pub path: String,
    /// 传输处理器的环境变量。
    pub environment: BTreeMap<String, String>,
    /// 传输处理器的参数。
    pub parameters: BTreeMap<String, String>,
}

impl Url {
    /// 构造指向本地端点的最小 URL。
    pub fn local(path: impl Into<String>) -> Url {
        Url {
            protocol: Protocol::Local,
            path: path.into(),
            ..Url::default()
        }
    }

    /// 解析并校验端点地址。
    ///
    /// - **契约 (What)**：除通用文法外，`Local` 协议的 `unix:` 地址必须
    ///   为绝对路径；
    /// - **风险 (Trade-offs)**：绝对性判定依据当前平台的路径语义，跨
    ///   平台传递的会话文件应只在目标平台上装配。
    pub fn forwarding_address(&self) -> Result<ForwardingAddress, AddressError> {
        let parsed = ForwardingAddress::parse(&self.path)?;
        if self.protocol == Protocol::Local
            && parsed.transport == Transport::Unix
            && !Path::new(&parsed.address).is_absolute()
        {
            return Err(AddressError::RelativeUnixPath {
                path: parsed.address,
            });
        }
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_all_transports() {
        for (path, transport) in [
            ("tcp:127.0.0.1:9000", Transport::Tcp),
            ("tcp4:0.0.0.0:80", Transport::Tcp4),
            ("tcp6:[::1]:80", Transport::Tcp6),
            ("unix:/tmp/ferry.sock", Transport::Unix),
            (r"npipe:\\.\pipe\ferry", Transport::Npipe),
        ] {
            let parsed = ForwardingAddress::parse(path).expect("valid path");
            assert_eq!(parsed.transport, transport);
        }
    }

    #[test]
    fn parse_keeps_colons_inside_address() {
        let parsed = ForwardingAddress::parse("tcp6:[::1]:8080").expect("valid path");
        assert_eq!(parsed.address, "[::1]:8080");
    }

    #[test]
    fn parse_rejects_malformed_paths() {
        assert!(matches!(
            ForwardingAddress::parse("nocolon"),
            Err(AddressError::MissingSeparator { .. })
        ));
        assert!(matches!(
            ForwardingAddress::parse("udp:127.0.0.1:53"),
            Err(AddressError::UnknownTransport { .. })
        ));
        assert!(matches!(
            ForwardingAddress::parse("tcp:"),
            Err(AddressError::EmptyAddress)
        ));
    }

    #[test]
    fn local_unix_requires_absolute_path() {
        let url = Url::local("unix:relative/path.sock");
        assert!(matches!(
            url.forwarding_address(),
            Err(AddressError::RelativeUnixPath { .. })
        ));

        let url = Url::local("unix:/var/run/ferry.sock");
        assert!(url.forwarding_address().is_ok());

        // 远端协议不施加绝对路径约束，路径语义属于对端平台。
        let url = Url {
            protocol: Protocol::Ssh,
            host: "build-host".to_owned(),
            path: "unix:run/ferry.sock".to_owned(),
            ..Url::default()
        };
        assert!(url.forwarding_address().is_ok());
    }
}
