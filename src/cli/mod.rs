//! Command implementations, one file per command group

pub mod analyze;
pub mod calls;
pub mod clear;
pub mod connection;
pub mod import;
pub mod recommend;
pub mod results;

/// Shorten `text` to its first line and at most `max` characters
pub(crate) fn truncate(text: &str, max: usize) -> String {
    let line = text.lines().next().unwrap_or(text);
    if line.chars().count() > max {
        let cut: String = line.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", cut)
    } else {
        line.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("first line\nsecond", 20), "first line");
        assert_eq!(truncate("abcdefghijkl", 8), "abcde...");
        assert_eq!(truncate("", 5), "");
    }
}
