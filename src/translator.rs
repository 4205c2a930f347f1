use anyhow::Result;
use indexmap::IndexSet;
use regex::Regex;
use std::sync::LazyLock;
use tracing::{debug, info, warn};

use crate::chunker::{self, BLOCK_SEPARATOR};
use crate::error::PipelineError;
use crate::keywords::{strip_markers, KeywordProtector};
use crate::model::{PageLayout, TranslationMap};
use crate::progress::{ProgressRange, ProgressSink};
use crate::providers::{Provider, ProviderUsage};
use crate::translations::{self, tool_spec, PromptOptions, TOOL_NAME};

pub const DEFAULT_CHUNK_SIZE: usize = 3500;
pub const DEFAULT_CONTENT_TYPE: &str = "software development";

/// Separator line as it comes back from a model, which may pad it. Line breaks
/// around it stay with the segments so adjacent separators each match.
static RETURNED_SEPARATOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*--BLOCK--[ \t]*\r?$").expect("separator pattern is valid")
});

#[derive(Debug, Clone)]
pub struct TranslatorConfig {
    pub target_language: String,
    pub content_type: String,
    pub chunk_size: usize,
    pub preserve_keywords: bool,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            target_language: "pt-BR".to_string(),
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            preserve_keywords: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionOutput {
    pub text: String,
    pub model: Option<String>,
    pub usage: Option<ProviderUsage>,
}

/// Drives chunked, strictly sequential translation of a document's texts.
#[derive(Debug, Clone)]
pub struct Translator<P: Provider + Clone> {
    provider: P,
    config: TranslatorConfig,
    protector: KeywordProtector,
}

impl<P: Provider + Clone> Translator<P> {
    pub fn new(provider: P, config: TranslatorConfig) -> Self {
        Self {
            provider,
            config,
            protector: KeywordProtector::default(),
        }
    }

    pub fn with_protector(mut self, protector: KeywordProtector) -> Self {
        self.protector = protector;
        self
    }

    /// Sends one chunk through the forced translation tool call.
    pub async fn exec(&self, system_prompt: &str, input: String) -> Result<ExecutionOutput> {
        let response = self
            .provider
            .clone()
            .register_tool(tool_spec(TOOL_NAME))
            .append_system_input(system_prompt.to_string())
            .append_user_input(input)
            .call_tool(TOOL_NAME)
            .await?;
        let text = translations::parse_tool_args(response.args)?;
        Ok(ExecutionOutput {
            text,
            model: response.model,
            usage: response.usage,
        })
    }

    /// Translates every text and returns the original to translated map.
    ///
    /// `texts` must already be unique and trimmed (see [`unique_texts`]). The
    /// first failing chunk aborts the whole call; nothing is retried.
    pub async fn translate_all(
        &self,
        texts: &[String],
        range: ProgressRange,
        progress: &mut dyn ProgressSink,
    ) -> Result<TranslationMap, PipelineError> {
        let mut map = TranslationMap::with_capacity(texts.len());
        if texts.is_empty() {
            progress.report(range.map(0, 0), "Nothing to translate");
            return Ok(map);
        }

        let joined = texts.join(BLOCK_SEPARATOR);
        let stream = if self.config.preserve_keywords {
            self.protector.mark(&joined).into_owned()
        } else {
            joined
        };
        let chunks = chunker::chunk(&stream, self.config.chunk_size.max(1));
        let total = chunks.len();

        let system_prompt = translations::render_system_prompt(
            &PromptOptions {
                target_language: self.config.target_language.clone(),
                content_type: self.config.content_type.clone(),
            },
            TOOL_NAME,
        )
        .map_err(|cause| PipelineError::ChunkTranslation {
            index: 1,
            total,
            cause,
        })?;

        let mut offset = 0;
        for (position, chunk) in chunks.into_iter().enumerate() {
            let index = position + 1;
            info!("translating chunk {}/{} ({} blocks)", index, total, chunk.blocks);
            let output = self
                .exec(&system_prompt, chunk.text)
                .await
                .map_err(|cause| PipelineError::ChunkTranslation {
                    index,
                    total,
                    cause,
                })?;
            if let Some(usage) = &output.usage {
                debug!(
                    "chunk {}/{} used {:?} tokens ({})",
                    index,
                    total,
                    usage.total_tokens,
                    output.model.as_deref().unwrap_or("unknown model")
                );
            }

            let end = (offset + chunk.blocks).min(texts.len());
            let originals = &texts[offset..end];
            let aligned = realign(&output.text, originals, index);
            for (original, translated) in originals.iter().zip(aligned) {
                map.insert(original.clone(), translated);
            }
            offset = end;
            progress.report(
                range.map(index, total),
                &format!("Translated chunk {}/{}", index, total),
            );
        }

        // Texts past the last aligned segment keep their original wording.
        for text in texts {
            if !map.contains_key(text) {
                map.insert(text.clone(), text.clone());
            }
        }
        Ok(map)
    }
}

/// Unique non-blank block texts across all pages, trimmed, in reading order.
pub fn unique_texts(pages: &[PageLayout]) -> Vec<String> {
    pages
        .iter()
        .flat_map(|page| page.blocks.iter())
        .filter(|block| !block.is_blank())
        .map(|block| block.key().to_string())
        .collect::<IndexSet<_>>()
        .into_iter()
        .collect()
}

/// Splits one chunk's translated output back into per-block values.
///
/// A count mismatch only affects this chunk: segments are matched by position
/// and anything missing or blank keeps the original text.
fn realign(output: &str, originals: &[String], index: usize) -> Vec<String> {
    let segments = RETURNED_SEPARATOR
        .split(output)
        .map(|segment| strip_markers(segment).trim().to_string())
        .collect::<Vec<_>>();
    if segments.len() != originals.len() {
        warn!(
            "chunk {} returned {} segments for {} blocks; aligning by position",
            index,
            segments.len(),
            originals.len()
        );
    }
    originals
        .iter()
        .enumerate()
        .map(|(i, original)| match segments.get(i) {
            Some(segment) if !segment.is_empty() => segment.clone(),
            _ => original.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keywords::unmark_keywords;
    use crate::model::{TextBlock, DEFAULT_FONT_FAMILY};
    use crate::progress::NoProgress;
    use crate::providers::{ProviderFuture, ProviderResponse, ToolSpec};
    use anyhow::anyhow;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    type Reply = Arc<dyn Fn(&str) -> Result<String> + Send + Sync>;

    #[derive(Clone)]
    struct TestProvider {
        system_prompt: Option<String>,
        user_input: Option<String>,
        calls: Arc<Mutex<Vec<String>>>,
        reply: Reply,
    }

    impl TestProvider {
        fn new(reply: impl Fn(&str) -> Result<String> + Send + Sync + 'static) -> Self {
            Self {
                system_prompt: None,
                user_input: None,
                calls: Arc::new(Mutex::new(Vec::new())),
                reply: Arc::new(reply),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Provider for TestProvider {
        fn append_system_input(mut self, input: String) -> Self {
            self.system_prompt = Some(input);
            self
        }

        fn append_user_input(mut self, input: String) -> Self {
            self.user_input = Some(input);
            self
        }

        fn register_tool(self, tool: ToolSpec) -> Self {
            assert_eq!(tool.name, TOOL_NAME);
            self
        }

        fn call_tool(self, _tool_name: &str) -> ProviderFuture {
            let input = self.user_input.unwrap_or_default();
            self.calls.lock().unwrap().push(input.clone());
            let reply = (self.reply)(&input);
            Box::pin(async move {
                let translation = reply?;
                Ok(ProviderResponse {
                    args: json!({"translation": translation}),
                    model: Some("test".to_string()),
                    usage: None,
                })
            })
        }
    }

    /// Upper-cases everything outside marker tags and drops the tags.
    fn shout(input: &str) -> Result<String> {
        let mut out = String::new();
        let mut rest = input;
        while let Some(start) = rest.find("<PRESERVE>") {
            out.push_str(&rest[..start].to_uppercase());
            let kept = &rest[start + "<PRESERVE>".len()..];
            let end = kept.find("</PRESERVE>").unwrap_or(kept.len());
            out.push_str(&kept[..end]);
            rest = kept.get(end + "</PRESERVE>".len()..).unwrap_or("");
        }
        out.push_str(&rest.to_uppercase());
        Ok(out)
    }

    fn texts(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    fn block(text: &str, page_number: u32) -> TextBlock {
        TextBlock {
            text: text.to_string(),
            x: 0.0,
            y: 0.0,
            width: 10.0,
            height: 10.0,
            font_size: 10.0,
            font_family: DEFAULT_FONT_FAMILY.to_string(),
            page_number,
        }
    }

    #[test]
    fn unique_texts_are_trimmed_and_deduplicated() {
        let mut first = PageLayout::new(100.0, 100.0);
        first.blocks = vec![block("Title", 1), block("  Body ", 1), block("   ", 1)];
        let mut second = PageLayout::new(100.0, 100.0);
        second.blocks = vec![block("Title", 2), block("Body", 2), block("End", 2)];
        assert_eq!(unique_texts(&[first, second]), texts(&["Title", "Body", "End"]));
    }

    #[tokio::test]
    async fn map_has_one_non_empty_entry_per_text() {
        let provider = TestProvider::new(shout);
        let translator = Translator::new(provider.clone(), TranslatorConfig::default());
        let input = texts(&["Hello", "Goodbye", "Thanks"]);
        let map = translator
            .translate_all(&input, ProgressRange::new(50.0, 90.0), &mut NoProgress)
            .await
            .unwrap();
        assert_eq!(map.len(), 3);
        assert_eq!(map["Hello"], "HELLO");
        assert_eq!(map["Thanks"], "THANKS");
        assert!(map.values().all(|value| !value.is_empty()));
        assert_eq!(provider.calls().len(), 1);
    }

    #[tokio::test]
    async fn protected_keywords_survive_translation() {
        let provider = TestProvider::new(shout);
        let translator = Translator::new(provider.clone(), TranslatorConfig::default());
        let map = translator
            .translate_all(&texts(&["def foo(): pass"]), ProgressRange::new(50.0, 90.0), &mut NoProgress)
            .await
            .unwrap();
        assert_eq!(map["def foo(): pass"], "def FOO(): pass");
        let sent = provider.calls();
        assert_eq!(
            unmark_keywords(&sent[0]),
            "def foo(): pass"
        );
        assert!(sent[0].contains("<PRESERVE>def</PRESERVE>"));
    }

    #[tokio::test]
    async fn keywords_are_sent_bare_when_protection_is_off() {
        let provider = TestProvider::new(shout);
        let config = TranslatorConfig {
            preserve_keywords: false,
            ..TranslatorConfig::default()
        };
        let map = Translator::new(provider.clone(), config)
            .translate_all(&texts(&["def foo"]), ProgressRange::new(50.0, 90.0), &mut NoProgress)
            .await
            .unwrap();
        assert_eq!(map["def foo"], "DEF FOO");
        assert_eq!(provider.calls(), vec!["def foo".to_string()]);
    }

    #[tokio::test]
    async fn chunks_are_sent_in_order_and_report_progress() {
        let provider = TestProvider::new(shout);
        let config = TranslatorConfig {
            chunk_size: 30,
            ..TranslatorConfig::default()
        };
        let input = texts(&["alpha alpha alpha", "bravo bravo bravo", "charlie charlie"]);
        let mut seen = Vec::new();
        let mut sink = |percent: u8, _: &str| seen.push(percent);
        let map = Translator::new(provider.clone(), config)
            .translate_all(&input, ProgressRange::new(50.0, 90.0), &mut sink)
            .await
            .unwrap();
        assert_eq!(
            provider.calls(),
            texts(&["alpha alpha alpha", "bravo bravo bravo", "charlie charlie"])
        );
        assert_eq!(seen, vec![63, 77, 90]);
        assert_eq!(map["charlie charlie"], "CHARLIE CHARLIE");
    }

    #[tokio::test]
    async fn dropped_separator_only_affects_its_chunk() {
        let provider = TestProvider::new(|input: &str| {
            if input.starts_with("one") {
                Ok("UM DOIS".to_string())
            } else {
                shout(input)
            }
        });
        let config = TranslatorConfig {
            chunk_size: 20,
            ..TranslatorConfig::default()
        };
        let input = texts(&["one", "two", "three four five six"]);
        let map = Translator::new(provider, config)
            .translate_all(&input, ProgressRange::new(50.0, 90.0), &mut NoProgress)
            .await
            .unwrap();
        assert_eq!(map["one"], "UM DOIS");
        assert_eq!(map["two"], "two");
        assert_eq!(map["three four five six"], "THREE FOUR FIVE SIX");
    }

    #[tokio::test]
    async fn failing_chunk_aborts_with_its_index() {
        let provider = TestProvider::new(|input: &str| {
            if input.contains("bad") {
                Err(anyhow!("quota exceeded"))
            } else {
                shout(input)
            }
        });
        let config = TranslatorConfig {
            chunk_size: 10,
            ..TranslatorConfig::default()
        };
        let err = Translator::new(provider.clone(), config)
            .translate_all(&texts(&["good", "bad", "later"]), ProgressRange::new(50.0, 90.0), &mut NoProgress)
            .await
            .unwrap_err();
        match err {
            PipelineError::ChunkTranslation { index, total, .. } => {
                assert_eq!((index, total), (2, 3));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(provider.calls().len(), 2);
    }

    #[tokio::test]
    async fn nothing_to_translate_makes_no_calls() {
        let provider = TestProvider::new(shout);
        let map = Translator::new(provider.clone(), TranslatorConfig::default())
            .translate_all(&[], ProgressRange::new(50.0, 90.0), &mut NoProgress)
            .await
            .unwrap();
        assert!(map.is_empty());
        assert!(provider.calls().is_empty());
    }

    #[test]
    fn realign_tolerates_padded_separators_and_stray_tags() {
        let originals = texts(&["a", "b", "c"]);
        let output = "A  \n --BLOCK-- \n\nB</PRESERVE>\n--BLOCK--\n";
        assert_eq!(realign(output, &originals, 1), texts(&["A", "B", "c"]));
    }

    #[test]
    fn realign_keeps_position_across_empty_segments() {
        let originals = texts(&["Hello", "12", "World"]);
        let spaced = "Olá\n--BLOCK--\n\n--BLOCK--\nMundo";
        assert_eq!(realign(spaced, &originals, 1), texts(&["Olá", "12", "Mundo"]));
        let adjacent = "Olá\r\n--BLOCK--\r\n--BLOCK--\r\nMundo";
        assert_eq!(realign(adjacent, &originals, 1), texts(&["Olá", "12", "Mundo"]));
    }

    #[tokio::test]
    async fn empty_reply_keeps_original_texts() {
        let provider = TestProvider::new(|_: &str| Ok(String::new()));
        let map = Translator::new(provider, TranslatorConfig::default())
            .translate_all(&texts(&["42", "v1.2.3"]), ProgressRange::new(50.0, 90.0), &mut NoProgress)
            .await
            .unwrap();
        assert_eq!(map["42"], "42");
        assert_eq!(map["v1.2.3"], "v1.2.3");
    }

    #[test]
    fn system_prompt_snapshot() {
        let prompt = translations::render_system_prompt(
            &PromptOptions {
                target_language: "pt-BR".to_string(),
                content_type: DEFAULT_CONTENT_TYPE.to_string(),
            },
            TOOL_NAME,
        )
        .unwrap();
        insta::assert_snapshot!(prompt, @r"
        You are a professional technical translator working on software development documents.
        Translate the user's text into pt-BR.

        Rules:
        - Terms wrapped in <PRESERVE></PRESERVE> must be copied exactly as written. Remove the <PRESERVE> and </PRESERVE> tags themselves from your output.
        - The input is a sequence of blocks separated by lines containing only --BLOCK--. Keep every --BLOCK-- line exactly where it is. Never merge, split, drop or add blocks.
        - Keep widely used English technical terms (framework names, APIs, commands, file names) in English.
        - Leave code, identifiers, URLs and numbers unchanged.
        - Use a clear, professional tone. Do not add explanations, notes or quotes.
        - Return the complete translated text through the `deliver_translation` tool in the `translation` field.
        ");
    }
}
