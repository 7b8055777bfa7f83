use bridge_domain::Transformer;

use super::request::{CacheControl, MessagesRequest};

/// Places prompt cache breakpoints for a multi-turn conversation:
/// - the last tool definition, so the tool list is cached on its own
/// - the last system block
/// - the last block of the last input message, caching the session so far
pub struct SetCache;

impl Transformer for SetCache {
    type Value = MessagesRequest;

    fn transform(&mut self, mut request: Self::Value) -> Self::Value {
        if let Some(tool) = request.tools.last_mut() {
            tool.cache_control = Some(CacheControl::Ephemeral);
        }

        if let Some(block) = request.system.last_mut() {
            *block = block.clone().cached(true);
        }

        if let Some(block) = request
            .messages
            .last_mut()
            .and_then(|message| message.content.last_mut())
        {
            *block = block.clone().cached(true);
        }

        request
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::claude::request::{ClaudeRole, ContentBlock, InputMessage, ToolDefinition};

    fn message(role: ClaudeRole, texts: &[&str]) -> InputMessage {
        InputMessage { role, content: texts.iter().map(|text| ContentBlock::text(*text)).collect() }
    }

    /// Renders every block, marking cached ones with `[`.
    fn render(request: &MessagesRequest) -> String {
        let blocks = request
            .system
            .iter()
            .chain(request.messages.iter().flat_map(|message| message.content.iter()));
        blocks
            .map(|block| {
                let text = match block {
                    ContentBlock::Text { text, .. } => text.as_str(),
                    _ => "?",
                };
                if block.is_cached() { format!("[{text}") } else { text.to_string() }
            })
            .collect()
    }

    #[test]
    fn test_marks_last_system_and_last_message_block() {
        let fixture = MessagesRequest {
            system: vec![ContentBlock::text("s"), ContentBlock::text("s")],
            messages: vec![
                message(ClaudeRole::User, &["u"]),
                message(ClaudeRole::Assistant, &["a"]),
                message(ClaudeRole::User, &["u", "u"]),
            ],
            ..Default::default()
        };

        let actual = render(&SetCache.transform(fixture));

        let expected = "s[suau[u";
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_marks_last_tool() {
        let tool = |name: &str| ToolDefinition {
            name: name.to_string(),
            description: String::new(),
            input_schema: serde_json::json!({"type": "object"}),
            cache_control: None,
        };
        let fixture = MessagesRequest { tools: vec![tool("a"), tool("b")], ..Default::default() };

        let actual = SetCache.transform(fixture);

        assert_eq!(actual.tools[0].cache_control, None);
        assert!(actual.tools[1].cache_control.is_some());
    }

    #[test]
    fn test_empty_request_is_unchanged() {
        let fixture = MessagesRequest::default();

        let actual = SetCache.transform(fixture.clone());

        assert_eq!(actual, fixture);
    }
}
