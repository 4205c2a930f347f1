/// Delimits logical blocks inside the aggregated text stream.
pub const BLOCK_SEPARATOR: &str = "\n--BLOCK--\n";

/// One bounded slice of the aggregated stream plus the number of logical
/// blocks it carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub text: String,
    pub blocks: usize,
}

/// Greedily packs separator-delimited blocks into chunks of at most
/// `max_len` characters, separators included. A block longer than `max_len`
/// becomes a chunk of its own; blocks are never split.
pub fn chunk(text: &str, max_len: usize) -> Vec<Chunk> {
    if text.is_empty() {
        return Vec::new();
    }
    let separator_len = BLOCK_SEPARATOR.chars().count();

    let mut chunks = Vec::new();
    let mut current: Option<(String, usize, usize)> = None;
    for block in text.split(BLOCK_SEPARATOR) {
        let block_len = block.chars().count();
        current = Some(match current.take() {
            None => (block.to_string(), block_len, 1),
            Some((mut acc, acc_len, blocks)) => {
                let joined_len = acc_len + separator_len + block_len;
                if joined_len <= max_len {
                    acc.push_str(BLOCK_SEPARATOR);
                    acc.push_str(block);
                    (acc, joined_len, blocks + 1)
                } else {
                    chunks.push(Chunk { text: acc, blocks });
                    (block.to_string(), block_len, 1)
                }
            }
        });
    }
    if let Some((acc, _, blocks)) = current {
        chunks.push(Chunk { text: acc, blocks });
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn join(chunks: &[Chunk]) -> String {
        chunks
            .iter()
            .map(|chunk| chunk.text.as_str())
            .collect::<Vec<_>>()
            .join(BLOCK_SEPARATOR)
    }

    fn blocks_of(count: usize, len: usize) -> String {
        (0..count)
            .map(|idx| {
                let ch = char::from(b'a' + (idx % 26) as u8);
                std::iter::repeat_n(ch, len).collect::<String>()
            })
            .collect::<Vec<_>>()
            .join(BLOCK_SEPARATOR)
    }

    #[test]
    fn packs_400_char_blocks_under_1000() {
        let text = blocks_of(13, 400);
        assert!(text.chars().count() >= 5000);
        let chunks = chunk(&text, 1000);
        assert_eq!(chunks.len(), 7);
        for piece in &chunks {
            assert!(piece.text.chars().count() <= 1000);
            assert!(!piece.text.starts_with('\n'));
            assert!(!piece.text.ends_with(BLOCK_SEPARATOR));
        }
        assert_eq!(chunks.iter().map(|c| c.blocks).sum::<usize>(), 13);
        assert_eq!(join(&chunks), text);
    }

    #[test]
    fn oversized_block_becomes_its_own_chunk() {
        let big = "x".repeat(50);
        let text = format!("ab{sep}{big}{sep}cd", sep = BLOCK_SEPARATOR);
        let chunks = chunk(&text, 20);
        assert_eq!(
            chunks
                .iter()
                .map(|c| c.text.as_str())
                .collect::<Vec<_>>(),
            vec!["ab", big.as_str(), "cd"]
        );
        assert_eq!(join(&chunks), text);
    }

    #[test]
    fn oversized_first_block_does_not_emit_empty_chunk() {
        let big = "y".repeat(30);
        let chunks = chunk(&big, 10);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, big);
    }

    #[test]
    fn empty_blocks_survive_round_trip() {
        let text = format!("a{sep}{sep}b", sep = BLOCK_SEPARATOR);
        let chunks = chunk(&text, 1000);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].blocks, 3);
        assert_eq!(join(&chunks), text);
    }

    #[test]
    fn empty_text_has_no_chunks() {
        assert!(chunk("", 10).is_empty());
    }

    #[test]
    fn counts_characters_not_bytes() {
        let text = format!("ção{}não", BLOCK_SEPARATOR);
        let limit = 3 + BLOCK_SEPARATOR.len() + 3;
        assert_eq!(chunk(&text, limit).len(), 1);
        assert_eq!(chunk(&text, limit - 1).len(), 2);
    }

    #[test]
    fn round_trips_for_many_limits() {
        let text = [
            "short",
            "a somewhat longer block of text",
            "",
            "x",
            "<PRESERVE>def</PRESERVE> foo(): <PRESERVE>pass</PRESERVE>",
        ]
        .join(BLOCK_SEPARATOR);
        for limit in [1, 5, 16, 40, 80, 10_000] {
            let chunks = chunk(&text, limit);
            assert_eq!(join(&chunks), text, "limit {}", limit);
            for piece in &chunks {
                if piece.blocks > 1 {
                    assert!(piece.text.chars().count() <= limit);
                }
            }
        }
    }
}
