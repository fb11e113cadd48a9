//! Target browser: chips known to the debug library, optionally extended by a
//! pack, and remembering the one the operator picks

use std::path::Path;

use tracing::info;

use crate::adapter::{DebugAdapter, TargetDescriptor};
use crate::error::{ConnectError, Result};
use crate::store::{ConfigStore, TARGET_NAME};

/// Known targets sorted by name, keeping those whose name, family or vendor
/// contains `filter` (case-insensitive)
pub fn browse(
    adapter: &dyn DebugAdapter,
    pack_path: Option<&Path>,
    filter: Option<&str>,
) -> std::result::Result<Vec<TargetDescriptor>, ConnectError> {
    let mut targets = adapter.list_targets(pack_path)?;

    if let Some(filter) = filter.map(str::to_ascii_lowercase).filter(|f| !f.is_empty()) {
        targets.retain(|target| {
            [&target.name, &target.family, &target.vendor]
                .iter()
                .any(|field| field.to_ascii_lowercase().contains(&filter))
        });
    }

    targets.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(targets)
}

/// Remember `name` as the target for later sessions.
///
/// The name must match a known target; the registry spelling is stored.
pub fn select(
    adapter: &dyn DebugAdapter,
    store: &dyn ConfigStore,
    pack_path: Option<&Path>,
    name: &str,
) -> Result<TargetDescriptor> {
    let chosen = adapter
        .list_targets(pack_path)?
        .into_iter()
        .find(|target| target.name.eq_ignore_ascii_case(name.trim()))
        .ok_or_else(|| ConnectError::TargetNotFound(name.to_string()))?;

    store.set(TARGET_NAME, &chosen.name)?;
    info!("Selected target {} ({})", chosen.name, chosen.family);
    Ok(chosen)
}
