//! Routes command implementation.

use crate::cli::ResourceKind;
use crate::resources::{CounterState, MapState, ValueState};
use crate::substrate::operation::{DispatchTable, StateMachine};
use anyhow::Result;
use clap::Args;

/// List a resource's operations.
#[derive(Args, Debug)]
pub struct RoutesArgs {
    /// Resource type.
    #[arg(short, long, value_enum)]
    pub resource: ResourceKind,

    /// Output as JSON lines.
    #[arg(long)]
    pub json: bool,
}

/// Run the routes command.
pub fn run_routes(args: RoutesArgs) -> Result<()> {
    let lines = match args.resource {
        ResourceKind::Value => describe(&ValueState::operations(), args.json)?,
        ResourceKind::Counter => describe(&CounterState::operations(), args.json)?,
        ResourceKind::Map => describe(&MapState::operations(), args.json)?,
    };
    for line in lines {
        println!("{}", line);
    }
    Ok(())
}

fn describe<S: StateMachine>(table: &DispatchTable<S>, json: bool) -> Result<Vec<String>> {
    let mut lines = Vec::with_capacity(table.len());
    for spec in table.iter() {
        if json {
            lines.push(serde_json::to_string(&serde_json::json!({
                "name": spec.name,
                "kind": spec.kind,
                "consistency": spec.consistency,
                "route": spec.route,
            }))?);
            continue;
        }
        let route = match spec.route {
            Some(route) => {
                let methods: Vec<_> = route.methods.iter().map(|m| m.to_string()).collect();
                format!("{} {}", methods.join(","), route.path)
            }
            None => "-".to_string(),
        };
        lines.push(format!(
            "{:<18} {:<8} {:<13} {}",
            spec.name,
            spec.kind.to_string(),
            format!("{:?}", spec.consistency).to_lowercase(),
            route
        ));
    }
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_table_lists_routes() {
        let lines = describe(&MapState::operations(), false).unwrap();
        let put = lines.iter().find(|l| l.starts_with("put ")).unwrap();
        assert!(put.contains("PUT /{key}"));
        assert!(put.contains("linearizable"));
    }

    #[test]
    fn json_lines_parse() {
        let lines = describe(&CounterState::operations(), true).unwrap();
        let first: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
        assert!(first["name"].is_string());
    }
}
