//! These models represent the objects passed around by the bridge
//!
//! There are several different related formats we need to interact with:
//! - openai chat-completion requests, sent from the dashboard plugin or IDE agent
//! - openai completion objects and chunks, sent back to those clients
//! - ollama chat messages/tools, sent from the bridge to the LLM
//! - MCP JSON-RPC envelopes, sent from the bridge to the tool server
//!
//! We always immediately convert those data models into the internal structs using
//! to/from helpers, so the orchestrator only ever sees these types.
pub mod message;
pub mod request;
pub mod role;
pub mod tool;
