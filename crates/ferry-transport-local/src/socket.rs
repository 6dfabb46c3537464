//! Unix 域套接字的属主/属组/权限应用。
//!
//! 说明符解析规则：空串表示继承进程身份（不做任何变更）；十进制数字
//! 直接作为内核 id；其余文本按账户/组名经系统数据库解析。

use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use ferry_core::{Configuration, Version};

/// 在已绑定的套接字路径上应用配置要求的属主与权限。
///
/// # 教案式注释
/// - **契约 (What)**：各字段为默认值时回落到版本默认；属主/属组只在
///   至少一项非继承时触发 `chown`；权限位总是被显式设置；
/// - **前置条件**：`path` 必须指向本次绑定产生的套接字文件；
/// - **后置条件**：失败时调用方应关闭监听器并移除路径，避免残留
///   半配置的套接字。
pub(crate) fn apply_socket_policy(
    path: &Path,
    configuration: &Configuration,
    version: Version,
) -> io::Result<()> {
    let owner_specification = if configuration.socket_owner.is_empty() {
        version.default_socket_owner()
    } else {
        configuration.socket_owner.as_str()
    };
    let group_specification = if configuration.socket_group.is_empty() {
        version.default_socket_group()
    } else {
        configuration.socket_group.as_str()
    };
    let permission_mode = if configuration.socket_permission_mode == 0 {
        version.default_socket_permission_mode()
    } else {
        configuration.socket_permission_mode
    };

    let owner = resolve_user(owner_specification)?;
    let group = resolve_group(group_specification)?;
    if owner.is_some() || group.is_some() {
        std::os::unix::fs::chown(path, owner, group)?;
    }
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(permission_mode))
}

fn resolve_user(specification: &str) -> io::Result<Option<u32>> {
    if specification.is_empty() {
        return Ok(None);
    }
    if let Ok(id) = specification.parse::<u32>() {
        return Ok(Some(id));
    }
    let user = nix::unistd::User::from_name(specification)
        .map_err(|errno| io::Error::from_raw_os_error(errno as i32))?;
    match user {
        Some(user) => Ok(Some(user.uid.as_raw())),
        None => Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("unknown socket owner: {specification:?}"),
        )),
    }
}

fn resolve_group(specification: &str) -> io::Result<Option<u32>> {
    if specification.is_empty() {
        return Ok(None);
    }
    if let Ok(id) = specification.parse::<u32>() {
        return Ok(Some(id));
    }
    let group = nix::unistd::Group::from_name(specification)
        .map_err(|errno| io::Error::from_raw_os_error(errno as i32))?;
    match group {
        Some(group) => Ok(Some(group.gid.as_raw())),
        None => Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("unknown socket group: {specification:?}"),
        )),
    }
}
