// System instruction and product inventory for the live session

use std::path::Path;

/// Inventory used when no inventory file can be read
pub const EMPTY_INVENTORY: &str = "[]";

/// Default location of the storefront inventory
pub const DEFAULT_INVENTORY_PATH: &str = "src/frontend/src/data/inventory.json";

pub struct SystemPrompts;

impl SystemPrompts {
    /// Middleware-style sales concierge instruction
    pub fn sales_concierge(inventory: &str) -> String {
        format!(
            "SYSTEM ROLE: You are a MIDDLEWARE API.

You receive voice commands.
You MUST execute `update_ui` for every command.

KNOWN CATEGORIES: laptop, phone, headphone, watch, camera, accessory.

RULES:
1. IF user says \"laptops\" -> CALL `update_ui(action='FILTER', target='laptop')`.
2. IF user says \"buy this\" -> CALL `update_ui(action='ADD_TO_CART', target='current')`.

CRITICAL PROTOCOL:
You MUST generate a `functionCall` or `executableCode` part FIRST.
Without a tool call, the user sees NOTHING.

CORRECT PATTERN:
[FUNCTION CALL] update_ui(...)
[AUDIO] \"Here are the laptops.\"

INCORRECT PATTERN:
[AUDIO] \"Here are the laptops.\" (FAILURE - NO ACTION TAKEN)

PRODUCT INVENTORY:
{}",
            inventory
        )
    }
}

/// Read the product inventory JSON, falling back to an empty list
pub fn load_inventory(path: &Path) -> String {
    if !path.exists() {
        log::warn!(
            "⚠️  Inventory not found at {}, using an empty inventory",
            path.display()
        );
        return EMPTY_INVENTORY.to_string();
    }

    match std::fs::read_to_string(path) {
        Ok(inventory) => {
            log::info!("📦 Loaded inventory from {}", path.display());
            inventory
        }
        Err(e) => {
            log::error!("❌ Error reading inventory {}: {}", path.display(), e);
            EMPTY_INVENTORY.to_string()
        }
    }
}
