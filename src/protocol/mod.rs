//! HTTP subset
//!
//! Request-line parsing, response headers and the status page. There is
//! no keep-alive: every response ends the connection, either right after
//! the header/page or when the streamed body ends.

pub mod request;
pub mod response;
pub mod status;

pub use request::{find_terminator, Method, ParseError, Request, Version};
pub use response::{Response, ResponseKind};
pub use status::{ConnectionRow, DefinitionRow};
