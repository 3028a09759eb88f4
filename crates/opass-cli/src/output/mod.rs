//! Terminal output helpers
//!
//! Colored status lines for the CLI. Secrets printed by commands go to
//! stdout unadorned so they can be piped; everything else is decorated.

use std::io::Write;

use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

fn status_line(out: &mut impl Write, color: Color, symbol: &str, msg: &str) {
    let _ = crossterm::execute!(
        out,
        SetForegroundColor(color),
        Print(symbol),
        Print(" "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print a success message in green with a checkmark prefix
pub fn print_success(msg: &str) {
    status_line(&mut std::io::stdout(), Color::Green, "✓", msg);
}

/// Print an error message in red to stderr
pub fn print_error(msg: &str) {
    status_line(&mut std::io::stderr(), Color::Red, "✗", msg);
}

/// Print a warning message in yellow to stderr
pub fn print_warning(msg: &str) {
    status_line(&mut std::io::stderr(), Color::Yellow, "⚠", msg);
}

/// Print an informational message in cyan
///
/// Goes to stderr so that stdout only carries command results.
pub fn print_info(msg: &str) {
    status_line(&mut std::io::stderr(), Color::Cyan, "ℹ", msg);
}

/// Print a registration code prominently
pub fn print_verification_code(code: &str) {
    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        Print("\n  Confirm this code in the password manager: "),
        SetForegroundColor(Color::Cyan),
        Print(code),
        ResetColor,
        Print("\n\n")
    );
}

/// Mask all but the first few characters of a secret
pub fn mask(secret: &str, visible: usize) -> String {
    let shown: String = secret.chars().take(visible).collect();
    let hidden = secret.chars().count().saturating_sub(visible);
    format!("{}{}", shown, "*".repeat(hidden))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask() {
        assert_eq!(mask("abcdef", 2), "ab****");
        assert_eq!(mask("ab", 4), "ab");
        assert_eq!(mask("", 3), "");
    }
}
