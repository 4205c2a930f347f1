use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use tera::{Context as TeraContext, Tera};

use crate::providers::ToolSpec;

pub const TOOL_NAME: &str = "deliver_translation";

const SYSTEM_PROMPT_TEMPLATE: &str = include_str!("prompts/system_prompt.tera");

#[derive(Debug, Clone)]
pub struct PromptOptions {
    pub target_language: String,
    pub content_type: String,
}

pub fn tool_spec(tool_name: &str) -> ToolSpec {
    ToolSpec {
        name: tool_name.to_string(),
        description: "Return the translated text, keeping every block separator line.".to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "translation": {"type": "string"}
            },
            "required": ["translation"]
        }),
    }
}

pub fn render_system_prompt(options: &PromptOptions, tool_name: &str) -> Result<String> {
    let target_language = options.target_language.trim();
    if target_language.is_empty() {
        return Err(anyhow!("target language is empty"));
    }
    let mut context = TeraContext::new();
    context.insert("target_language", target_language);
    context.insert("content_type", options.content_type.trim());
    context.insert("tool_name", tool_name);

    Tera::one_off(SYSTEM_PROMPT_TEMPLATE, &context, false)
        .with_context(|| "failed to render system prompt")
}

#[derive(Debug, Deserialize)]
struct ToolArgs {
    translation: String,
}

/// Pulls the translated text out of the tool call arguments. An empty
/// translation is returned as is; callers fall back to the source text.
pub fn parse_tool_args(value: Value) -> Result<String> {
    let args: ToolArgs =
        serde_json::from_value(value).with_context(|| "invalid translation tool arguments")?;
    Ok(args.translation)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> PromptOptions {
        PromptOptions {
            target_language: "pt-BR".to_string(),
            content_type: "software development".to_string(),
        }
    }

    #[test]
    fn prompt_names_language_and_tool() {
        let prompt = render_system_prompt(&options(), TOOL_NAME).unwrap();
        assert!(prompt.contains("into pt-BR"));
        assert!(prompt.contains("software development documents"));
        assert!(prompt.contains("`deliver_translation` tool"));
        assert!(prompt.contains("--BLOCK--"));
    }

    #[test]
    fn prompt_requires_a_language() {
        let mut options = options();
        options.target_language = "  ".to_string();
        assert!(render_system_prompt(&options, TOOL_NAME).is_err());
    }

    #[test]
    fn parses_translation_field() {
        assert_eq!(
            parse_tool_args(json!({"translation": "Olá"})).unwrap(),
            "Olá"
        );
        assert_eq!(parse_tool_args(json!({"translation": ""})).unwrap(), "");
        assert!(parse_tool_args(json!({"text": "Olá"})).is_err());
    }
}
