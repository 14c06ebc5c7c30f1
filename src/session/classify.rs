//! Telling debugger commands from questions

use std::collections::HashSet;

/// Marker that asks for the rendered prompt to be printed first
pub const DEV_MARKER: &str = "[dev]";

const DEFAULT_COMMANDS: &[&str] = &[
    "a", "alias", "args", "b", "break", "bt", "c", "cl", "clear", "commands", "condition",
    "cont", "continue", "d", "debug", "disable", "display", "down", "enable", "exit", "h",
    "help", "ignore", "interact", "j", "jump", "l", "list", "ll", "longlist", "n", "next", "p",
    "pp", "q", "quit", "r", "restart", "retval", "return", "run", "rv", "s", "source", "step",
    "tbreak", "u", "unalias", "undisplay", "unt", "until", "up", "w", "whatis", "where",
];

const QUESTION_WORDS: &[&str] = &[
    "why", "what", "how", "when", "where", "who", "whom", "whose", "which", "can", "could",
    "would", "should", "is", "are", "was", "were", "does", "do", "did", "will", "explain",
    "tell", "isn", "aren", "doesn", "didn", "shouldn", "wouldn",
];

/// Decides whether an input line is meant for the model.
///
/// The verdict depends only on the line, so repeated calls agree.
#[derive(Debug, Clone)]
pub struct InputClassifier {
    commands: HashSet<String>,
}

impl Default for InputClassifier {
    fn default() -> Self {
        Self {
            commands: DEFAULT_COMMANDS.iter().map(|c| c.to_string()).collect(),
        }
    }
}

impl InputClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also treat `names` as debugger commands
    pub fn with_commands<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.commands.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn is_command_word(&self, word: &str) -> bool {
        self.commands.contains(word)
    }

    pub fn is_conversational(&self, line: &str) -> bool {
        let line = strip_dev_marker(line).trim();
        if line.starts_with('>') {
            return true;
        }
        if !line.contains('?') {
            return false;
        }
        if line.starts_with('?') {
            return true;
        }
        if reads_as_english(line) {
            return true;
        }
        let first = line.split_whitespace().next().unwrap_or_default();
        if self.is_command_word(first) || is_bare_expression(line) {
            return false;
        }
        true
    }
}

/// Whether the line carries the `[dev]` marker
pub fn has_dev_marker(line: &str) -> bool {
    line.trim_start().starts_with(DEV_MARKER)
}

/// Line with a leading `[dev]` marker removed
pub fn strip_dev_marker(line: &str) -> &str {
    let trimmed = line.trim_start();
    trimmed
        .strip_prefix(DEV_MARKER)
        .map(str::trim_start)
        .unwrap_or(trimmed)
}

fn plain_word(token: &str) -> Option<&str> {
    let word = token.trim_end_matches(['?', '.', ',', '!', ':', ';', '"', '\'']);
    let is_plain = !word.is_empty()
        && word.chars().all(|c| c.is_alphabetic() || c == '\'')
        && word.chars().next().is_some_and(char::is_alphabetic);
    is_plain.then_some(word)
}

fn reads_as_english(line: &str) -> bool {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let Some(first) = tokens.first() else {
        return false;
    };
    let lead: String = first
        .chars()
        .take_while(|c| c.is_alphabetic())
        .collect::<String>()
        .to_lowercase();
    if QUESTION_WORDS.contains(&lead.as_str()) {
        return true;
    }
    let plain = tokens.iter().filter(|t| plain_word(t).is_some()).count();
    plain >= 3 && plain * 2 >= tokens.len()
}

/// True when every `?` sits inside a string literal and brackets balance,
/// i.e. the line could be an expression or statement.
fn is_bare_expression(line: &str) -> bool {
    let mut depth: i32 = 0;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for c in line.chars() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            '?' => return false,
            '#' => break,
            _ => {}
        }
    }
    quote.is_none() && depth == 0
}

/// Whether a debugger error message suggests a mistyped natural-language
/// reply
pub fn looks_like_syntax_or_name_error(message: &str) -> bool {
    ["SyntaxError", "NameError", "invalid syntax", "is not defined"]
        .iter()
        .any(|needle| message.contains(needle))
}
