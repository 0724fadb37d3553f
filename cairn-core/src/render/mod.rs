//! Output text fixups applied to final answers before display.
//!
//! Models emit LaTeX with a mix of delimiter conventions, and literal
//! dollar signs in currency amounts collide with `$...$` math rendering.
//! This module rewrites both into the form the chat frontend renders
//! correctly. Pure string transforms; applied identically to streamed and
//! non-streamed answers so both paths yield the same text.

use regex::Regex;
use std::sync::LazyLock;

// $123, $123,456.78, optionally bold/italic-wrapped and suffixed with a
// currency code. The leading group stands in for a lookbehind: an already
// escaped \$ must not be escaped twice.
static CURRENCY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(^|[^\\])(\**)\$(\d[\d,]*\.?\d*)(\s*)((?:USD|EUR|CHF|GBP|BTC|ETH)?)(\**)")
        .expect("currency pattern")
});

// Display math written as brackets on their own lines.
static DISPLAY_BRACKET_LINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\n\[\s*\n(.*?)\n\]\s*\n").expect("display bracket pattern"));

// Inline [ ... ] that contains LaTeX-looking content (backslash commands,
// superscripts, subscripts, equals).
static INLINE_BRACKET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[([^\[\]]*(?:[\\^_=]|\\[a-zA-Z]+)[^\[\]]*)\]").expect("inline bracket pattern")
});

static INLINE_PAREN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\\\((.*?)\\\)").expect("inline paren pattern"));

static DISPLAY_BRACKET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\\\[(.*?)\\\]").expect("display bracket pattern"));

/// Normalize math delimiters and escape currency dollar signs.
pub fn normalize_math_delimiters(text: &str) -> String {
    // Escape currency amounts first, before any delimiter rewriting.
    let text = CURRENCY.replace_all(text, "${1}${2}\\$$${3}${4}${5}${6}");

    // Models emit a literal backslash before $$; repair it. Single \$ is
    // left alone since the currency pass just introduced those.
    let text = text.replace("\\$$", "$$");

    let text = DISPLAY_BRACKET_LINES.replace_all(&text, "\n$$$$\n${1}\n$$$$\n");
    let text = INLINE_BRACKET.replace_all(&text, "$$$$${1}$$$$");
    let text = INLINE_PAREN.replace_all(&text, "$$${1}$$");
    let text = DISPLAY_BRACKET.replace_all(&text, "$$$$${1}$$$$");

    text.into_owned()
}
