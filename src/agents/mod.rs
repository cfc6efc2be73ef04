/// Agents
///
/// - The `Agent` trait and its data types
/// - The registry the engine resolves node kinds through
/// - The LLM backend collaborator and the built-in agents

pub mod builtin;
pub mod llm;
pub mod registry;
pub mod traits;
pub mod types;

pub use builtin::register_builtin_agents;
pub use llm::{stream_generation, ChunkStream, HttpLlmBackend, LlmBackend, LlmRequest, LlmResponse, Usage};
pub use registry::{AgentDescriptor, AgentRegistry};
pub use traits::Agent;
pub use types::{keys, AgentConfig, AgentContext, AgentKind, AgentResult, ConversationTurn};
