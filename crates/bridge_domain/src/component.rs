use std::pin::Pin;
use std::sync::Arc;

use derive_setters::Setters;
use http::Extensions;
use tokio_stream::Stream;

use crate::{Document, Message, ToolChoice, ToolInfo};

pub type MessageStream = Pin<Box<dyn Stream<Item = anyhow::Result<Message>> + Send>>;

/// Turns texts into dense vectors.
#[async_trait::async_trait]
pub trait Embedder: Send + Sync {
    async fn embed_strings(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f64>>>;
}

/// Writes documents into a backing store and returns their ids.
#[async_trait::async_trait]
pub trait Indexer: Send + Sync {
    async fn store(
        &self,
        docs: Vec<Document>,
        options: IndexerOptions,
    ) -> anyhow::Result<Vec<String>>;
}

/// Looks up documents relevant to a query.
#[async_trait::async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(
        &self,
        query: &str,
        options: RetrieverOptions,
    ) -> anyhow::Result<Vec<Document>>;
}

#[async_trait::async_trait]
pub trait ChatModel: Send + Sync {
    async fn generate(&self, input: Vec<Message>, options: ChatOptions)
    -> anyhow::Result<Message>;

    async fn stream(
        &self,
        input: Vec<Message>,
        options: ChatOptions,
    ) -> anyhow::Result<MessageStream>;
}

/// A chat model that can be bound to tools. Binding returns a new model and
/// leaves the receiver untouched, so one instance can be shared safely.
pub trait ToolCallingChatModel: ChatModel + Sized {
    fn with_tools(&self, tools: Vec<ToolInfo>) -> anyhow::Result<Self>;
}

#[derive(derive_more::Debug, Clone, Default, Setters)]
#[setters(strip_option, into)]
pub struct IndexerOptions {
    pub sub_indexes: Vec<String>,
    #[debug(skip)]
    pub embedder: Option<Arc<dyn Embedder>>,
    #[setters(skip)]
    pub extensions: Extensions,
}

#[derive(derive_more::Debug, Clone, Default, Setters)]
#[setters(strip_option, into)]
pub struct RetrieverOptions {
    pub index: Option<String>,
    pub sub_index: Option<String>,
    pub top_k: Option<usize>,
    pub score_threshold: Option<f64>,
    #[debug(skip)]
    pub embedder: Option<Arc<dyn Embedder>>,
    #[setters(skip)]
    pub extensions: Extensions,
}

#[derive(Debug, Clone, Default, Setters)]
#[setters(strip_option, into)]
pub struct ChatOptions {
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f32>,
    pub stop: Option<Vec<String>>,
    pub tools: Option<Vec<ToolInfo>>,
    pub tool_choice: Option<ToolChoice>,
    pub allowed_tool_names: Vec<String>,
    #[setters(skip)]
    pub extensions: Extensions,
}

macro_rules! impl_extensions {
    ($($ty:ty),*) => {$(
        impl $ty {
            /// Attaches a component specific option value.
            pub fn with_extension<T: Clone + Send + Sync + 'static>(mut self, value: T) -> Self {
                self.extensions.insert(value);
                self
            }

            pub fn extension<T: Send + Sync + 'static>(&self) -> Option<&T> {
                self.extensions.get::<T>()
            }
        }
    )*};
}

impl_extensions!(IndexerOptions, RetrieverOptions, ChatOptions);

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Partition(String);

    #[test]
    fn test_extensions_round_through_options() {
        let fixture = RetrieverOptions::default()
            .top_k(3usize)
            .with_extension(Partition("p1".to_string()));

        assert_eq!(fixture.top_k, Some(3));
        assert_eq!(fixture.extension::<Partition>(), Some(&Partition("p1".to_string())));
        assert_eq!(fixture.extension::<String>(), None);
    }

    #[test]
    fn test_cloned_options_keep_extensions() {
        let fixture = ChatOptions::default().with_extension(42u32);
        let actual = fixture.clone();
        assert_eq!(actual.extension::<u32>(), Some(&42));
    }
}
