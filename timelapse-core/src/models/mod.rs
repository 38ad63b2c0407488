pub mod endpoint;
pub mod exchange;
pub mod raw_event;

pub use endpoint::EndpointAggregate;
pub use exchange::{CapturedExchange, HeaderMap};
pub use raw_event::{RawContent, RawEvent, RawHeader, RawPostData, RawRequest, RawResponse};
