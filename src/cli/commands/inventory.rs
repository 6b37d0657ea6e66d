//! Inventory commands - List hosts
//!
//! This module implements the `list-hosts` subcommand.

use super::CommandContext;
use anyhow::Result;
use clap::Parser;
use provisor::inventory::Inventory;

/// Arguments for the list-hosts command
#[derive(Parser, Debug, Clone)]
pub struct ListHostsArgs {
    /// Host pattern to match
    #[arg(default_value = "all")]
    pub pattern: String,
}

impl ListHostsArgs {
    /// Execute the list-hosts command
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let inventory = ctx.load_inventory()?;
        let hosts = match matching_hosts(&inventory, &self.pattern, ctx.limit.as_deref()) {
            Ok(hosts) => hosts,
            Err(e) => {
                ctx.output.error(&e.to_string());
                return Ok(1);
            }
        };

        if ctx.output.is_json() {
            let entries: Vec<serde_json::Value> = hosts
                .iter()
                .map(|(name, address)| serde_json::json!({"name": name, "address": address}))
                .collect();
            println!("{}", serde_json::Value::Array(entries));
            return Ok(0);
        }

        ctx.output.line(&format!("  hosts ({}):", hosts.len()));
        for (name, address) in &hosts {
            if name == address {
                ctx.output.line(&format!("    {}", name));
            } else {
                ctx.output.line(&format!("    {} ({})", name, address));
            }
        }

        Ok(0)
    }
}

/// Names and addresses of the hosts matching `pattern`, narrowed by `limit`
fn matching_hosts(
    inventory: &Inventory,
    pattern: &str,
    limit: Option<&str>,
) -> provisor::inventory::InventoryResult<Vec<(String, String)>> {
    let mut hosts = inventory.get_hosts_for_pattern(pattern)?;
    if let Some(limit) = limit {
        let allowed = inventory.get_hosts_for_pattern(limit)?;
        hosts.retain(|h| allowed.iter().any(|a| a.name == h.name));
    }
    Ok(hosts
        .into_iter()
        .map(|h| (h.name.clone(), h.address().to_string()))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const INVENTORY: &str = r#"
all:
  children:
    webservers:
      hosts:
        web1: { address: 10.0.0.11 }
        web2: { address: 10.0.0.12 }
    dbservers:
      hosts:
        db1: { address: 10.0.0.21 }
"#;

    #[test]
    fn test_list_hosts_args() {
        let args = ListHostsArgs::try_parse_from(["list-hosts", "webservers"]).unwrap();
        assert_eq!(args.pattern, "webservers");
    }

    #[test]
    fn test_matching_hosts_with_limit() {
        let inventory = Inventory::from_yaml_str(INVENTORY).unwrap();
        let hosts = matching_hosts(&inventory, "all", Some("web*")).unwrap();
        assert_eq!(
            hosts,
            vec![
                ("web1".to_string(), "10.0.0.11".to_string()),
                ("web2".to_string(), "10.0.0.12".to_string()),
            ]
        );
    }
}
