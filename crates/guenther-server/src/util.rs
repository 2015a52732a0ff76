/// Chat titles are the first user message, truncated to 50 characters plus
/// an ellipsis.
pub fn truncate_title(text: &str) -> String {
    if text.chars().count() > 50 {
        let truncated: String = text.chars().take(50).collect();
        format!("{truncated}...")
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_beyond_50_chars() {
        assert_eq!(truncate_title("Hallo"), "Hallo");
        let long = "a".repeat(80);
        let title = truncate_title(&long);
        assert!(title.ends_with("..."));
        assert_eq!(title.chars().count(), 53);
    }
}
