//! Unified request/response types shared across provider adapters.

pub mod chat;
pub mod usage;

pub use chat::{
    ChatMessage, ChatRequest, ContentPart, FinishReason, FunctionCall, GenerationParams,
    MessageContent, MessageRole, ReasoningEffort, ResponseFormat, Tool, ToolCall, ToolChoice,
    ToolFunction,
};
pub use usage::Usage;
