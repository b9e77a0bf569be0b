//! Minimal HTTP/1.x wire handling: an incremental request parser and a
//! response encoder. Just enough grammar to decide "more bytes needed" vs
//! "request complete" vs "malformed" and to emit well-formed responses.

pub mod request;
pub mod response;

pub use request::{Method, ParseStatus, Request, RequestParser, Version};
pub use response::{Response, Status};
