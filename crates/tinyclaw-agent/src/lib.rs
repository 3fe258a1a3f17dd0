//! TinyClaw agent core — the reasoning loop, its tools, and the context it
//! thinks with.
//!
//! - **tools**: `Tool` trait, instrumented registry, and every built-in
//! - **context**: system prompt + message list assembly
//! - **memory** / **skills**: file-backed ambient context sources
//! - **agent_loop**: the think-act loop with summarisation and client swap
//! - **subagent**: background task delegation for the `spawn` tool

pub mod agent_loop;
pub mod context;
pub mod memory;
pub mod skills;
pub mod subagent;
pub mod tools;

pub use agent_loop::{AgentLoop, AgentSettings, SharedLlm, StreamSink};
pub use context::ContextBuilder;
pub use memory::MemoryStore;
pub use skills::SkillsIndex;
pub use subagent::SubagentManager;
pub use tools::{Tool, ToolError, ToolRegistry};
