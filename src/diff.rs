//! Highlight what a revised code snippet changed

use colored::Colorize;
use similar::{Algorithm, ChangeTag, TextDiff};

/// `new` with inserted/replaced characters colored.
///
/// Deleted characters are dropped: the result always reads as `new`.
pub fn colordiff_new_str(old: &str, new: &str, color: &str) -> String {
    let diff = TextDiff::configure()
        .algorithm(Algorithm::Myers)
        .diff_chars(old, new);

    let mut out = String::with_capacity(new.len());
    let mut inserted = String::new();
    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Delete => {}
            ChangeTag::Insert => inserted.push_str(change.value()),
            ChangeTag::Equal => {
                flush_inserted(&mut out, &mut inserted, color);
                out.push_str(change.value());
            }
        }
    }
    flush_inserted(&mut out, &mut inserted, color);
    out
}

fn flush_inserted(out: &mut String, inserted: &mut String, color: &str) {
    if inserted.is_empty() {
        return;
    }
    out.push_str(&inserted.as_str().color(color).to_string());
    inserted.clear();
}
