//! Three-tier toolset assembly.
//!
//! Exactly one tier is chosen per session:
//!
//! 1. **Catalog-driven** - discovery returned at least one descriptor.
//!    Known names bind their built-in handler; everything else becomes a
//!    generic bridge.
//! 2. **Capability-driven** - no usable catalog, but `ClientCapabilities`
//!    was received at `initialize`. Tools are included per flag.
//! 3. **Default** - neither is available; the full built-in set.
//!
//! When the catalog contradicts the capability flags, the catalog wins:
//! once tier 1 is selected the flags are not consulted at all.

use crate::toolset::builtin::BuiltinTool;
use crate::toolset::{SessionTool, Toolset};
use broker_domain::{ClientCapabilities, DiscoveryTier, ToolCatalog};
use tracing::debug;

pub struct ToolsetBuilder;

impl ToolsetBuilder {
    /// Assemble the toolset for one session.
    pub fn build(
        catalog: Option<&ToolCatalog>,
        capabilities: Option<&ClientCapabilities>,
    ) -> Toolset {
        if let Some(catalog) = catalog.filter(|c| !c.is_empty()) {
            let mut toolset = Toolset::new(DiscoveryTier::Catalog);
            for descriptor in catalog.iter() {
                let tool = match BuiltinTool::for_name(&descriptor.name) {
                    Some(tool) => SessionTool::Builtin {
                        tool,
                        descriptor: descriptor.clone(),
                    },
                    None => SessionTool::Bridge {
                        descriptor: descriptor.clone(),
                    },
                };
                toolset.push(tool);
            }
            debug!(tools = toolset.len(), "built catalog-driven toolset");
            return toolset;
        }

        if let Some(caps) = capabilities {
            let mut toolset = Toolset::new(DiscoveryTier::Capabilities);
            if caps.fs.read_text_file {
                toolset.push(builtin_entry(BuiltinTool::ReadFile));
            }
            if caps.fs.write_text_file {
                toolset.push(builtin_entry(BuiltinTool::WriteFile));
            }
            if caps.terminal {
                toolset.push(builtin_entry(BuiltinTool::RunCommand));
            }
            debug!(tools = toolset.len(), "built capability-driven toolset");
            return toolset;
        }

        let mut toolset = Toolset::new(DiscoveryTier::Default);
        toolset.push(builtin_entry(BuiltinTool::ReadFile));
        toolset.push(builtin_entry(BuiltinTool::WriteFile));
        toolset.push(builtin_entry(BuiltinTool::RunCommand));
        toolset
    }
}

fn builtin_entry(tool: BuiltinTool) -> SessionTool {
    SessionTool::Builtin {
        descriptor: tool.descriptor(),
        tool,
    }
}
