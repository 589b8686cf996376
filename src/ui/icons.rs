//! Emoji with plain-text fallbacks for terminals that cannot render them.

use console::Emoji;

pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK] ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR] ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "[!] ");
pub static GATE: Emoji<'_, '_> = Emoji("🚧 ", "[GATE] ");
pub static REWIND: Emoji<'_, '_> = Emoji("⏪ ", "[<<] ");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "* ");
pub static QUESTION: Emoji<'_, '_> = Emoji("❓ ", "[?] ");
