//! Package module - ensure packages are present or absent
//!
//! The package manager comes from the task key (`apt`, `yum`, `dnf`) or,
//! for the generic `package` key, from the host's `os_family` fact. Each
//! package is queried first; only the missing (or unwanted) ones are passed
//! to the manager, so a second run reports "already satisfied".

use serde::{Deserialize, Serialize};

use super::{one_or_many, ActionError, ActionResult, ModuleContext, ModuleOutput};
use crate::connection::escape_shell_arg;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    Apt,
    Dnf,
    Yum,
    Pacman,
    Zypper,
    Apk,
}

impl PackageManager {
    /// Pick the manager for an `os_family` fact value
    pub fn for_os_family(os_family: &str) -> Option<Self> {
        match os_family {
            "Debian" => Some(PackageManager::Apt),
            "RedHat" => Some(PackageManager::Dnf),
            "Archlinux" => Some(PackageManager::Pacman),
            "Suse" => Some(PackageManager::Zypper),
            "Alpine" => Some(PackageManager::Apk),
            _ => None,
        }
    }

    /// Command exiting 0 iff `package` is installed
    pub fn query_cmd(&self, package: &str) -> String {
        let pkg = escape_shell_arg(package);
        match self {
            PackageManager::Apt => format!(
                "dpkg-query -W -f='${{Status}}' {} 2>/dev/null | grep -q 'install ok installed'",
                pkg
            ),
            PackageManager::Dnf | PackageManager::Yum | PackageManager::Zypper => {
                format!("rpm -q {}", pkg)
            }
            PackageManager::Pacman => format!("pacman -Q {}", pkg),
            PackageManager::Apk => format!("apk info -e {}", pkg),
        }
    }

    pub fn install_cmd(&self, packages: &[String]) -> String {
        let prefix = match self {
            PackageManager::Apt => "DEBIAN_FRONTEND=noninteractive apt-get install -y",
            PackageManager::Dnf => "dnf install -y",
            PackageManager::Yum => "yum install -y",
            PackageManager::Pacman => "pacman -S --noconfirm",
            PackageManager::Zypper => "zypper install -y",
            PackageManager::Apk => "apk add",
        };
        join_packages(prefix, packages)
    }

    pub fn remove_cmd(&self, packages: &[String]) -> String {
        let prefix = match self {
            PackageManager::Apt => "DEBIAN_FRONTEND=noninteractive apt-get remove -y",
            PackageManager::Dnf => "dnf remove -y",
            PackageManager::Yum => "yum remove -y",
            PackageManager::Pacman => "pacman -R --noconfirm",
            PackageManager::Zypper => "zypper remove -y",
            PackageManager::Apk => "apk del",
        };
        join_packages(prefix, packages)
    }

    pub fn update_cmd(&self) -> &'static str {
        match self {
            PackageManager::Apt => "apt-get update",
            PackageManager::Dnf => "dnf makecache",
            PackageManager::Yum => "yum makecache",
            PackageManager::Pacman => "pacman -Sy",
            PackageManager::Zypper => "zypper refresh",
            PackageManager::Apk => "apk update",
        }
    }
}

fn join_packages(prefix: &str, packages: &[String]) -> String {
    let quoted: Vec<String> = packages.iter().map(|p| escape_shell_arg(p)).collect();
    format!("{} {}", prefix, quoted.join(" "))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PackageState {
    #[default]
    #[serde(alias = "installed", alias = "latest")]
    Present,
    #[serde(alias = "removed")]
    Absent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageArgs {
    #[serde(alias = "pkg", deserialize_with = "one_or_many")]
    pub name: Vec<String>,
    #[serde(default)]
    pub state: PackageState,
    /// Refresh the package index before installing
    #[serde(default)]
    pub update_cache: bool,
    /// Explicit manager, set when the task used `apt`, `yum` or `dnf`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manager: Option<PackageManager>,
}

fn resolve_manager(args: &PackageArgs, ctx: &ModuleContext<'_>) -> ActionResult<PackageManager> {
    if let Some(manager) = args.manager {
        return Ok(manager);
    }
    match ctx.facts.get_str("os_family") {
        Some(family) => PackageManager::for_os_family(family).ok_or_else(|| {
            ActionError::Unsupported(format!("no package manager known for os_family '{}'", family))
        }),
        None => Err(ActionError::Unsupported(
            "os_family fact unavailable, cannot choose a package manager".to_string(),
        )),
    }
}

pub async fn execute(args: &PackageArgs, ctx: &ModuleContext<'_>) -> ActionResult<ModuleOutput> {
    if args.name.is_empty() {
        return Err(ActionError::InvalidArgs(
            "package requires at least one name".to_string(),
        ));
    }

    let manager = resolve_manager(args, ctx)?;
    let want_installed = args.state == PackageState::Present;

    let mut pending = Vec::new();
    for package in &args.name {
        let installed = ctx.run(&manager.query_cmd(package)).await?.success;
        if installed != want_installed {
            pending.push(package.clone());
        }
    }

    let verb = if want_installed { "install" } else { "remove" };
    let packages = serde_json::json!(args.name);

    if pending.is_empty() {
        return Ok(ModuleOutput::satisfied(format!(
            "all packages already {}",
            if want_installed { "installed" } else { "absent" }
        ))
        .with_data("packages", packages));
    }

    if ctx.check_mode {
        return Ok(
            ModuleOutput::would_change(format!("would {}: {}", verb, pending.join(", ")))
                .with_data("packages", packages)
                .with_data("pending", serde_json::json!(pending)),
        );
    }

    if want_installed && args.update_cache {
        ctx.run_checked(manager.update_cmd()).await?;
    }

    let command = if want_installed {
        manager.install_cmd(&pending)
    } else {
        manager.remove_cmd(&pending)
    };
    let result = ctx.run(&command).await?;

    let output = if result.success {
        let done = if want_installed { "installed" } else { "removed" };
        ModuleOutput::changed(format!("{}: {}", done, pending.join(", ")))
    } else {
        ModuleOutput::failed(format!(
            "failed to {} {}: {}",
            verb,
            pending.join(", "),
            result.stderr.trim()
        ))
    };

    Ok(output
        .with_command(&result)
        .with_data("packages", packages)
        .with_data(
            if want_installed { "installed" } else { "removed" },
            serde_json::json!(pending),
        ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commands() {
        let pkgs = vec!["nginx".to_string(), "curl".to_string()];
        assert_eq!(
            PackageManager::Apt.install_cmd(&pkgs),
            "DEBIAN_FRONTEND=noninteractive apt-get install -y 'nginx' 'curl'"
        );
        assert_eq!(PackageManager::Dnf.remove_cmd(&pkgs), "dnf remove -y 'nginx' 'curl'");
        assert_eq!(PackageManager::Apk.query_cmd("nginx"), "apk info -e 'nginx'");
        assert!(PackageManager::Apt
            .query_cmd("nginx")
            .starts_with("dpkg-query -W -f='${Status}' 'nginx'"));
    }

    #[test]
    fn test_os_family_mapping() {
        assert_eq!(PackageManager::for_os_family("Debian"), Some(PackageManager::Apt));
        assert_eq!(PackageManager::for_os_family("RedHat"), Some(PackageManager::Dnf));
        assert_eq!(PackageManager::for_os_family("Darwin"), None);
    }

    #[test]
    fn test_args_accept_string_or_list() {
        let args: PackageArgs =
            serde_json::from_value(serde_json::json!({"name": "nginx, curl"})).unwrap();
        assert_eq!(args.name, vec!["nginx", "curl"]);
        assert_eq!(args.state, PackageState::Present);

        let args: PackageArgs = serde_json::from_value(
            serde_json::json!({"name": ["git"], "state": "absent", "manager": "yum"}),
        )
        .unwrap();
        assert_eq!(args.state, PackageState::Absent);
        assert_eq!(args.manager, Some(PackageManager::Yum));
    }
}
