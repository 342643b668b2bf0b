//! Tool discovery and invocation.
//!
//! - [`schema`]: tool descriptors, the merged registry, and local
//!   argument validation
//! - [`protocol`]: the request/response envelope shared by both bindings
//! - [`transport`]: stdio and HTTP transport bindings
//! - [`client`]: discovery and invocation over configured endpoints

pub mod client;
pub mod protocol;
pub mod schema;
pub mod transport;

pub use client::{DiscoveryError, InvokeError, ToolClient};
pub use protocol::{CallToolResult, ContentBlock, Request, Response, RpcError};
pub use schema::{RegistryError, ToolRegistry, ToolSchema, ValidationError};
pub use transport::{HttpTransport, StdioTransport, Transport, TransportError, TransportKind};
