use std::sync::Arc;

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
        CreateChatCompletionRequest, CreateChatCompletionRequestArgs, ResponseFormat,
        ResponseFormatJsonSchema,
    },
    Client,
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::AppError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub system: String,
    pub user: String,
    /// Ask for the `{answer, references}` JSON shape instead of free text.
    pub structured: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Generation {
    pub text: String,
    /// Raw citation markers as returned by the model.
    pub citations: Vec<String>,
}

/// Produces text from a prompt.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<Generation, AppError>;
}

pub fn query_response_schema() -> Value {
    json!({
       "type": "object",
       "properties": {
           "answer": { "type": "string" },
           "references": {
               "type": "array",
               "items": {
                   "type": "object",
                   "properties": {
                       "reference": { "type": "string" },
                   },
               "required": ["reference"],
               "additionalProperties": false,
               }
           }
       },
       "required": ["answer", "references"],
       "additionalProperties": false
    })
}

#[derive(Debug, Deserialize)]
struct Reference {
    reference: String,
}

#[derive(Debug, Deserialize)]
struct StructuredAnswer {
    answer: String,
    #[serde(default)]
    references: Vec<Reference>,
}

/// Parses a structured answer. Output that is not the expected JSON is kept
/// as plain text with no citations.
pub fn parse_generation(content: &str) -> Generation {
    match serde_json::from_str::<StructuredAnswer>(content) {
        Ok(parsed) => Generation {
            text: parsed.answer,
            citations: parsed
                .references
                .into_iter()
                .map(|reference| reference.reference.trim().to_string())
                .filter(|reference| !reference.is_empty())
                .collect(),
        },
        Err(err) => {
            warn!(error = %err, "generator returned unstructured output");
            Generation {
                text: content.trim().to_string(),
                citations: Vec::new(),
            }
        }
    }
}

/// Chat-completions backed generator.
#[derive(Clone)]
pub struct OpenAiGenerator {
    client: Arc<Client<OpenAIConfig>>,
    model: String,
}

impl OpenAiGenerator {
    pub fn new(client: Arc<Client<OpenAIConfig>>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    fn create_chat_request(
        &self,
        request: GenerationRequest,
    ) -> Result<CreateChatCompletionRequest, OpenAIError> {
        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(&self.model).messages([
            ChatCompletionRequestSystemMessage::from(request.system).into(),
            ChatCompletionRequestUserMessage::from(request.user).into(),
        ]);

        if request.structured {
            args.response_format(ResponseFormat::JsonSchema {
                json_schema: ResponseFormatJsonSchema {
                    description: Some("Answer grounded in the supplied passages".into()),
                    name: "grounded_answer_with_references".into(),
                    schema: Some(query_response_schema()),
                    strict: Some(true),
                },
            });
        }

        args.build()
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<Generation, AppError> {
        let structured = request.structured;
        let chat_request = self.create_chat_request(request)?;
        let response = self.client.chat().create(chat_request).await?;

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.as_ref())
            .ok_or(AppError::LLMParsing(
                "No content found in LLM response".into(),
            ))?;
        debug!(model = %self.model, chars = content.len(), "generation completed");

        if structured {
            Ok(parse_generation(content))
        } else {
            Ok(Generation {
                text: content.trim().to_string(),
                citations: Vec::new(),
            })
        }
    }
}
