use std::sync::atomic::{AtomicUsize, Ordering};

use owo_colors::AnsiColors;

static COLOR_NUM: AtomicUsize = AtomicUsize::new(0);

/// Cycles through a fixed set of colors so that the forwarded output of
/// different commands can be told apart
pub fn next_terminal_color() -> AnsiColors {
    const COLORS: [AnsiColors; 6] = [
        AnsiColors::Green,
        AnsiColors::Cyan,
        AnsiColors::Magenta,
        AnsiColors::Yellow,
        AnsiColors::Blue,
        AnsiColors::BrightGreen,
    ];
    COLORS[COLOR_NUM.fetch_add(1, Ordering::Relaxed) % COLORS.len()]
}
