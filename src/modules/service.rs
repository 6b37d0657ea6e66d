//! Service module - manage systemd units
//!
//! `systemctl is-active` / `is-enabled` are queried before any change so
//! that a unit already in the requested state is left alone.

use serde::{Deserialize, Serialize};

use super::{ActionError, ActionResult, ModuleContext, ModuleOutput};
use crate::connection::escape_shell_arg;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Started,
    Stopped,
    Restarted,
    Reloaded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceArgs {
    pub name: String,
    #[serde(default)]
    pub state: Option<ServiceState>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

fn systemctl(verb: &str, unit: &str) -> String {
    format!("systemctl {} {}", verb, escape_shell_arg(unit))
}

pub async fn execute(args: &ServiceArgs, ctx: &ModuleContext<'_>) -> ActionResult<ModuleOutput> {
    if args.name.trim().is_empty() {
        return Err(ActionError::InvalidArgs("service requires a name".to_string()));
    }
    if args.state.is_none() && args.enabled.is_none() {
        return Err(ActionError::InvalidArgs(
            "service requires 'state' or 'enabled'".to_string(),
        ));
    }

    let mut planned: Vec<&'static str> = Vec::new();

    let active = ctx.run(&systemctl("is-active", &args.name)).await?.success;
    match args.state {
        Some(ServiceState::Started) if !active => planned.push("start"),
        Some(ServiceState::Stopped) if active => planned.push("stop"),
        Some(ServiceState::Restarted) => planned.push("restart"),
        Some(ServiceState::Reloaded) => planned.push(if active { "reload" } else { "start" }),
        _ => {}
    }

    if let Some(want_enabled) = args.enabled {
        let enabled = ctx.run(&systemctl("is-enabled", &args.name)).await?.success;
        if enabled != want_enabled {
            planned.push(if want_enabled { "enable" } else { "disable" });
        }
    }

    let final_state = match args.state {
        Some(ServiceState::Stopped) => "stopped",
        Some(_) => "started",
        None if active => "started",
        None => "stopped",
    };

    if planned.is_empty() {
        return Ok(ModuleOutput::satisfied(format!(
            "service {} already in requested state",
            args.name
        ))
        .with_data("name", serde_json::json!(args.name))
        .with_data("state", serde_json::json!(final_state)));
    }

    if ctx.check_mode {
        return Ok(ModuleOutput::would_change(format!(
            "would {} {}",
            planned.join(" and "),
            args.name
        ))
        .with_data("name", serde_json::json!(args.name))
        .with_data("pending", serde_json::json!(planned)));
    }

    let mut last = None;
    for verb in &planned {
        let result = ctx.run(&systemctl(verb, &args.name)).await?;
        if !result.success {
            return Ok(ModuleOutput::failed(format!(
                "systemctl {} {} failed: {}",
                verb,
                args.name,
                result.stderr.trim()
            ))
            .with_command(&result)
            .with_data("name", serde_json::json!(args.name)));
        }
        last = Some(result);
    }

    let mut output = ModuleOutput::changed(format!("{}: {}", args.name, planned.join(", ")));
    if let Some(result) = &last {
        output = output.with_command(result);
    }
    Ok(output
        .with_data("name", serde_json::json!(args.name))
        .with_data("state", serde_json::json!(final_state))
        .with_data("actions", serde_json::json!(planned)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_systemctl_command() {
        assert_eq!(systemctl("is-active", "nginx"), "systemctl is-active 'nginx'");
    }

    #[test]
    fn test_args_parse() {
        let args: ServiceArgs = serde_json::from_value(
            serde_json::json!({"name": "nginx", "state": "started", "enabled": true}),
        )
        .unwrap();
        assert_eq!(args.state, Some(ServiceState::Started));
        assert_eq!(args.enabled, Some(true));
    }
}
