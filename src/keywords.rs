use anyhow::{Context, Result};
use regex::{Regex, RegexBuilder};
use std::borrow::Cow;
use std::sync::LazyLock;

pub const PRESERVE_OPEN: &str = "<PRESERVE>";
pub const PRESERVE_CLOSE: &str = "</PRESERVE>";

const PYTHON: &[&str] = &[
    "def", "class", "import", "from", "__init__", "self", "lambda", "yield", "async", "await",
    "with", "as", "try", "except", "finally", "raise", "assert", "pass", "return", "break",
    "continue", "if", "elif", "else", "for", "while", "in", "is", "not", "and", "or", "True",
    "False", "None", "print", "len", "range", "enumerate", "zip", "map", "filter", "list", "dict",
    "set", "tuple", "str", "int", "float", "bool",
];

const JAVASCRIPT: &[&str] = &[
    "function", "const", "let", "var", "class", "extends", "import", "export", "default", "async",
    "await", "promise", "then", "catch", "finally", "if", "else", "switch", "case", "for", "while",
    "do", "break", "continue", "return", "new", "this", "typeof", "instanceof", "delete", "void",
    "yield", "true", "false", "null", "undefined", "console", "log", "require", "module",
    "exports", "prototype", "constructor",
];

const JAVA: &[&str] = &[
    "public", "private", "protected", "class", "interface", "extends", "implements", "abstract",
    "final", "static", "synchronized", "volatile", "transient", "native", "strictfp", "package",
    "import", "if", "else", "switch", "case", "for", "while", "do", "break", "continue", "return",
    "try", "catch", "finally", "throw", "throws", "new", "this", "super", "void", "int", "long",
    "double", "float", "boolean", "char", "byte", "short", "true", "false", "null",
];

const SQL: &[&str] = &[
    "SELECT", "FROM", "WHERE", "JOIN", "INNER", "LEFT", "RIGHT", "OUTER", "ON", "GROUP BY",
    "ORDER BY", "HAVING", "INSERT", "UPDATE", "DELETE", "CREATE", "ALTER", "DROP", "TABLE",
    "INDEX", "VIEW", "PROCEDURE", "FUNCTION", "TRIGGER", "PRIMARY KEY", "FOREIGN KEY", "UNIQUE",
    "NOT NULL", "DEFAULT", "CHECK", "AND", "OR", "NOT", "IN", "LIKE", "BETWEEN", "IS NULL",
    "IS NOT NULL", "AS", "DISTINCT", "COUNT", "SUM", "AVG", "MIN", "MAX",
];

const COMMON_TERMS: &[&str] = &[
    "API", "HTTP", "HTTPS", "GET", "POST", "PUT", "DELETE", "REST", "JSON", "XML", "HTML", "CSS",
    "URL", "URI", "CRUD", "MVC", "OOP", "async", "sync", "callback", "promise", "array", "object",
    "string", "integer", "boolean", "float", "double", "char", "byte", "null", "undefined", "void",
    "true", "false", "debug", "error", "exception", "stack", "heap", "queue", "tree", "hash",
    "algorithm", "complexity", "O(n)", "O(1)", "O(log n)",
];

/// Cap on the compiled keyword alternation, same as the regex crate default.
const PATTERN_SIZE_LIMIT: usize = 10 * (1 << 20);

static DEFAULT_PROTECTOR: LazyLock<KeywordProtector> = LazyLock::new(|| {
    KeywordProtector::new(builtin_keywords()).expect("built-in keyword pattern compiles")
});

static MARKED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<PRESERVE>(.*?)</PRESERVE>").expect("valid marker pattern"));

/// Every dictionary keyword, deduplicated, longest first.
pub fn builtin_keywords() -> Vec<&'static str> {
    let mut keywords = [PYTHON, JAVASCRIPT, JAVA, SQL, COMMON_TERMS].concat();
    keywords.sort_unstable();
    keywords.dedup();
    sort_longest_first(&mut keywords);
    keywords
}

fn sort_longest_first(keywords: &mut [&str]) {
    keywords.sort_by(|a, b| {
        b.chars()
            .count()
            .cmp(&a.chars().count())
            .then_with(|| a.cmp(b))
    });
}

/// Wraps dictionary terms in inert marker tags so the translator leaves them alone.
#[derive(Debug, Clone)]
pub struct KeywordProtector {
    pattern: Option<Regex>,
}

impl KeywordProtector {
    pub fn new<I, S>(keywords: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::with_size_limit(keywords, PATTERN_SIZE_LIMIT)
    }

    /// The built-in dictionary plus `extra` terms.
    pub fn with_extra<I, S>(extra: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let extra = extra
            .into_iter()
            .map(|keyword| keyword.as_ref().to_string())
            .collect::<Vec<_>>();
        let builtin = builtin_keywords();
        Self::new(builtin.iter().copied().chain(extra.iter().map(String::as_str)))
    }

    fn with_size_limit<I, S>(keywords: I, size_limit: usize) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut owned = keywords
            .into_iter()
            .map(|keyword| keyword.as_ref().trim().to_string())
            .filter(|keyword| !keyword.is_empty())
            .collect::<Vec<_>>();
        owned.sort_unstable();
        owned.dedup();
        let mut keywords = owned.iter().map(String::as_str).collect::<Vec<_>>();
        sort_longest_first(&mut keywords);

        if keywords.is_empty() {
            return Ok(Self { pattern: None });
        }
        // The regex engine is leftmost-first, so longer alternatives listed
        // first win over shorter ones starting at the same position.
        let alternation = keywords
            .iter()
            .map(|keyword| bounded(keyword))
            .collect::<Vec<_>>()
            .join("|");
        let pattern = RegexBuilder::new(&format!("(?:{})", alternation))
            .size_limit(size_limit)
            .build()
            .with_context(|| format!("failed to compile {} keywords", keywords.len()))?;
        Ok(Self {
            pattern: Some(pattern),
        })
    }

    pub fn mark<'a>(&self, text: &'a str) -> Cow<'a, str> {
        match &self.pattern {
            Some(pattern) => {
                pattern.replace_all(text, format!("{}$0{}", PRESERVE_OPEN, PRESERVE_CLOSE))
            }
            None => Cow::Borrowed(text),
        }
    }
}

impl Default for KeywordProtector {
    fn default() -> Self {
        DEFAULT_PROTECTOR.clone()
    }
}

/// Word boundaries only make sense next to word characters; `O(n)` must still
/// match when followed by a space.
fn bounded(keyword: &str) -> String {
    let starts_word = keyword.chars().next().is_some_and(is_word_char);
    let ends_word = keyword.chars().last().is_some_and(is_word_char);
    format!(
        "{}{}{}",
        if starts_word { r"\b" } else { "" },
        regex::escape(keyword),
        if ends_word { r"\b" } else { "" }
    )
}

fn is_word_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_'
}

pub fn mark_keywords(text: &str) -> String {
    DEFAULT_PROTECTOR.mark(text).into_owned()
}

/// Removes well-formed marker pairs, keeping the wrapped term.
pub fn unmark_keywords(text: &str) -> String {
    MARKED.replace_all(text, "$1").into_owned()
}

/// Drops any marker tag left behind, paired or not.
pub(crate) fn strip_markers(text: &str) -> String {
    text.replace(PRESERVE_OPEN, "").replace(PRESERVE_CLOSE, "")
}
