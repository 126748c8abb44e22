//! HTTP protocol implementation.
//!
//! The HTTP layer handles one request per connection (the server always
//! answers `Connection: close`) and is organized into several submodules:
//!
//! - **`parser`**: streaming request parser over the mirror-mapped ring
//! - **`request`**: HTTP request representation
//! - **`response`**: HTTP response representation with builder pattern
//! - **`writer`**: serializes and writes HTTP responses to the client
//! - **`mime`**: MIME type detection based on file extensions
//! - **`connection`**: per-connection handler tying parser, cache and writer
//!   together
//!
//! # Request lifecycle
//!
//! ```text
//!        ┌─────────────┐
//!        │   Receive   │ ← parser pulls bytes on demand into the ring
//!        └──────┬──────┘
//!               │ Request parsed (or typed error)
//!               ▼
//!        ┌──────────────────┐
//!        │    Dispatch      │ ← welcome page, cache lookup, or canned error
//!        └──────┬───────────┘
//!               │ Response ready
//!               ▼
//!        ┌──────────────────┐
//!        │     Write        │ ← header + body in one pass, then close
//!        └──────────────────┘
//! ```

pub mod connection;
pub mod mime;
pub mod parser;
pub mod request;
pub mod response;
pub mod writer;
