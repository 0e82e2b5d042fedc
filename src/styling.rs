//! Terminal output helpers. Trimmed from `worktrunk`'s styling module down to
//! the semantic constants and print re-exports `gitp` actually uses — no
//! syntax highlighting, hyperlinks, or diff-line rendering.
//!
//! Use `anstream::println`/`eprintln` for all output so `NO_COLOR` /
//! `CLICOLOR_FORCE` / terminal detection are honored automatically, and
//! `color_print::cformat!` for semantic styling:
//!
//! ```
//! use color_print::cformat;
//! let msg = cformat!("<red>error:</> {}", "uncommitted changes");
//! ```

use anstyle::{AnsiColor, Color, Style};

pub use anstream::{eprint, eprintln, print, println};

/// Error style (red) — `{ERROR}text{ERROR:#}`.
pub const ERROR: Style = Style::new().fg_color(Some(Color::Ansi(AnsiColor::Red)));

/// Warning style (yellow).
pub const WARNING: Style = Style::new().fg_color(Some(Color::Ansi(AnsiColor::Yellow)));

/// Hint style (dimmed).
pub const HINT: Style = Style::new().dimmed();

/// Success style (green).
pub const GREEN: Style = Style::new().fg_color(Some(Color::Ansi(AnsiColor::Green)));

/// Status-symbol style for a [`crate::reconcile::RepoState`].
pub fn state_style(state: crate::reconcile::RepoState) -> Style {
    use crate::reconcile::RepoState::*;
    match state {
        Clean => GREEN,
        Modified | Unaligned => WARNING,
        Nonexistent | Unlinked => ERROR,
        Overlayed => Style::new().fg_color(Some(Color::Ansi(AnsiColor::Cyan))),
    }
}
