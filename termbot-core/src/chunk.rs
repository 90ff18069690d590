// ABOUTME: Splits outgoing text into chunks that respect the chat transport's message-size cap
// ABOUTME: Splits on line boundaries where possible, hard-splits a line only when it alone is too long

pub const DEFAULT_MAX_CHARS: usize = 4096;

pub fn chunk_message(text: &str, max_chars: usize) -> Vec<String> {
    if text.chars().count() <= max_chars {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();

    for line in text.split('\n') {
        let would_overflow =
            !current.is_empty() && current.chars().count() + line.chars().count() + 1 > max_chars;
        if would_overflow {
            chunks.push(std::mem::take(&mut current));
        }

        if line.chars().count() > max_chars {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            for piece in hard_split(line, max_chars) {
                chunks.push(piece);
            }
            continue;
        }

        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

fn hard_split(line: &str, max_chars: usize) -> Vec<String> {
    let chars: Vec<char> = line.chars().collect();
    chars
        .chunks(max_chars)
        .map(|c| c.iter().collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_a_single_chunk() {
        assert_eq!(chunk_message("hello", 100), vec!["hello".to_string()]);
    }

    #[test]
    fn splits_on_line_boundaries() {
        let text = "a".repeat(5) + "\n" + &"b".repeat(5);
        let chunks = chunk_message(&text, 6);
        assert_eq!(chunks, vec!["aaaaa".to_string(), "bbbbb".to_string()]);
    }

    #[test]
    fn hard_splits_a_single_overlong_line() {
        let line = "x".repeat(10);
        let chunks = chunk_message(&line, 4);
        assert_eq!(chunks, vec!["xxxx", "xxxx", "xx"]);
    }

    #[test]
    fn multibyte_text_is_split_by_codepoint_not_byte() {
        let line = "héllo wörld".repeat(2);
        let chunks = chunk_message(&line, 5);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 5);
        }
        assert_eq!(chunks.concat().replace('\n', ""), line);
    }
}
