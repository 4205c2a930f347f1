/// Joins recognized words into line text. Words are whitespace-separated by
/// definition except between CJK/kana glyphs, which the engine splits per
/// character.
pub(super) fn join_words<'a, I>(words: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let mut line = String::new();
    for word in words {
        let word = word.trim();
        if word.is_empty() {
            continue;
        }
        if needs_space(&line, word) {
            line.push(' ');
        }
        line.push_str(word);
    }
    line
}

fn needs_space(left: &str, right: &str) -> bool {
    let last = left.chars().next_back();
    let first = right.chars().next();
    match (last, first) {
        (Some(a), Some(b)) => !(is_cjk_or_kana(a) && is_cjk_or_kana(b)),
        _ => false,
    }
}

fn is_cjk_or_kana(ch: char) -> bool {
    matches!(
        ch as u32,
        0x4E00..=0x9FFF | 0x3040..=0x30FF | 0x31F0..=0x31FF | 0x3400..=0x4DBF
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_latin_words_with_spaces() {
        assert_eq!(join_words(["def", "foo():", "pass"]), "def foo(): pass");
    }

    #[test]
    fn skips_blank_tokens() {
        assert_eq!(join_words(["", "a", "  ", "b"]), "a b");
    }

    #[test]
    fn keeps_cjk_runs_tight() {
        assert_eq!(join_words(["日", "本", "語", "API"]), "日本語 API");
    }
}
