//! Shared UI icons.

use console::Emoji;

// Status indicators
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "[WARN]");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "*");

// Campaign indicators
pub static CHECKPOINT: Emoji<'_, '_> = Emoji("📌 ", "[CP]");
pub static ROLLBACK: Emoji<'_, '_> = Emoji("⏪ ", "[RB]");
pub static TOOL: Emoji<'_, '_> = Emoji("🔧 ", "[T]");
pub static STOP: Emoji<'_, '_> = Emoji("🛑 ", "[STOP]");
