//! Outbound text chunking. Telegram caps messages at 4096 characters; long
//! replies are split into chunks where every chunk except the last is
//! terminated with an ellipsis marker.

/// Maximum payload characters per chunk, leaving room for the ellipsis.
const CHUNK_MAX: usize = 4090;
const ELLIPSIS: &str = "\n[...]";

/// Split `text` into Telegram-sized chunks. Non-final chunks end with
/// `\n[...]`; the final chunk never does. Splits prefer newline, then
/// space, then a hard cut at a char boundary.
pub fn split_chunks(text: &str) -> Vec<String> {
    if text.len() <= CHUNK_MAX {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while remaining.len() > CHUNK_MAX {
        let mut cut = CHUNK_MAX;
        while !remaining.is_char_boundary(cut) {
            cut -= 1;
        }
        let window = &remaining[..cut];
        let split_at = window
            .rfind('\n')
            .or_else(|| window.rfind(' '))
            .filter(|&i| i > 0)
            .unwrap_or(cut);

        chunks.push(format!("{}{ELLIPSIS}", remaining[..split_at].trim_end()));
        remaining = remaining[split_at..].trim_start();
    }

    if !remaining.is_empty() {
        chunks.push(remaining.to_string());
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_single_chunk() {
        let chunks = split_chunks("Hallo, Welt!");
        assert_eq!(chunks, vec!["Hallo, Welt!"]);
    }

    #[test]
    fn exactly_chunk_max_is_single_chunk() {
        let text = "a".repeat(CHUNK_MAX);
        assert_eq!(split_chunks(&text).len(), 1);
    }

    #[test]
    fn long_text_splits_with_ellipsis_except_last() {
        let line = "a".repeat(2000);
        let text = format!("{line}\n{line}\n{line}\n{line}");
        let chunks = split_chunks(&text);
        assert!(chunks.len() >= 2);
        for (i, chunk) in chunks.iter().enumerate() {
            assert!(chunk.len() <= 4096, "chunk {i} too large: {}", chunk.len());
            if i + 1 < chunks.len() {
                assert!(chunk.ends_with(ELLIPSIS), "chunk {i} missing ellipsis");
            }
        }
        assert!(!chunks.last().unwrap().ends_with(ELLIPSIS));
    }

    #[test]
    fn single_long_line_force_splits() {
        let text = "x".repeat(9000);
        let chunks = split_chunks(&text);
        assert!(chunks.len() >= 2);
        for chunk in &chunks {
            assert!(chunk.len() <= 4096);
        }
        // No content lost apart from the ellipsis markers.
        let joined: String = chunks
            .iter()
            .map(|c| c.trim_end_matches(ELLIPSIS))
            .collect();
        assert_eq!(joined, text);
    }

    #[test]
    fn splits_on_multibyte_boundaries() {
        let text = "ü".repeat(5000);
        for chunk in split_chunks(&text) {
            assert!(chunk.len() <= 4096);
            assert!(chunk.is_char_boundary(chunk.len()));
        }
    }
}
