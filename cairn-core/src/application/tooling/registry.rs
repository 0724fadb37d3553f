use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

use super::interface::SessionToolInfo;
use crate::domain::types::ToolSpec;

/// Flatten per-backend tool listings into one mapping keyed by tool name.
///
/// Tool names are assumed globally unique across backends. When two
/// backends declare the same name, the later listing wins; registration
/// order is therefore significant and must be deterministic at the caller.
pub fn normalize_tool_listings(
    listings: &[(String, Vec<SessionToolInfo>)],
) -> BTreeMap<String, ToolSpec> {
    let mut tools = BTreeMap::new();

    for (backend, infos) in listings {
        for info in infos {
            if tools.contains_key(&info.name) {
                debug!(
                    tool = %info.name,
                    backend = %backend,
                    "duplicate tool name, later registration wins"
                );
            }
            tools.insert(
                info.name.clone(),
                ToolSpec {
                    description: info.description.clone().unwrap_or_default(),
                    input_schema: info
                        .input_schema
                        .clone()
                        .unwrap_or_else(|| Value::Object(Default::default())),
                },
            );
        }
    }

    tools
}
