//! Tool execution pipeline
//!
//! A pipeline turns a [`ToolRequest`] into a stream of output fragments
//! followed by exactly one terminal [`ToolResult`]. The workflow runner only
//! depends on the [`ToolPipeline`] trait; [`CommandPipeline`] runs tools as
//! local processes.
//!
//! # Example
//!
//! ```ignore
//! use toolflow::pipeline::{CommandPipeline, PipelineEvent, ToolPipeline, ToolRequest};
//! use futures::StreamExt;
//!
//! let pipeline = CommandPipeline::new();
//! let mut events = pipeline.invoke(ToolRequest::new(tool, ActionType::Run));
//!
//! while let Some(event) = events.next().await {
//!     match event {
//!         PipelineEvent::Fragment(text) => print!("{}", text),
//!         PipelineEvent::Result(result) => println!("{:?}", result),
//!     }
//! }
//! ```

mod command;
mod process;
mod types;

pub use command::CommandPipeline;
pub use types::{
    CANCELLED_CODE, PREVIEW_LIMIT, PipelineEvent, ToolError, ToolOutput, ToolPipeline, ToolRequest,
    ToolResponse, ToolResult, preview,
};
