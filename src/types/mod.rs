//! 类型模块：食谱输入、摘要、配酒建议与工具调用的数据类型。
//!
//! # Types Module
//!
//! Strongly-typed views of the artifacts the pipeline caches and of the
//! tool-calling surface exposed to the model.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`RecipeInput`] | A URL or free text, with its stable identifier |
//! | [`Summary`] | Model summary envelope (`ok` / `summary` / `abortReason`) |
//! | [`Suggestion`] | One wine pairing |
//! | [`SuggestionsResponse`] | Final answer of the tool-augmented flow |
//! | [`ToolDefinition`] / [`ToolCall`] / [`ToolResult`] | Tool calling |

pub mod recipe;
pub mod tool;

pub use recipe::{extract_json, RecipeInput, Suggestion, SuggestionsResponse, Summary};
pub use tool::{ToolCall, ToolDefinition, ToolResult};
