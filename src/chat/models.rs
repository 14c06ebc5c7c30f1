//! Nominal context windows (in tokens) of known models

const CONTEXT_WINDOWS: &[(&str, usize)] = &[
    ("gpt-3.5-turbo", 4096),
    ("gpt-4", 8192),
    ("gpt-4-32k", 32768),
    ("code-davinci-002", 8001),
    ("claude", 8000),
];

/// Context window for `model_name`.
///
/// Exact names win, then the longest known prefix (so dated snapshots like
/// `gpt-4-0613` resolve to `gpt-4`). Unknown models get the smallest window.
pub fn context_window(model_name: &str) -> usize {
    if let Some((_, window)) = CONTEXT_WINDOWS.iter().find(|(name, _)| *name == model_name) {
        return *window;
    }
    CONTEXT_WINDOWS
        .iter()
        .filter(|(name, _)| model_name.starts_with(name))
        .max_by_key(|(name, _)| name.len())
        .map(|(_, window)| *window)
        .unwrap_or_else(smallest_context_window)
}

fn smallest_context_window() -> usize {
    CONTEXT_WINDOWS
        .iter()
        .map(|(_, window)| *window)
        .min()
        .unwrap_or(4096)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_windows() {
        assert_eq!(context_window("gpt-3.5-turbo"), 4096);
        assert_eq!(context_window("gpt-4-32k"), 32768);
        assert_eq!(context_window("gpt-4-0613"), 8192);
        assert_eq!(context_window("claude-v1"), 8000);
        assert_eq!(context_window("mystery-model"), 4096);
    }
}
