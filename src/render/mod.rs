//! Background render pipeline: requests, worker pool, completion queue

pub mod request;
pub mod service;
pub(crate) mod worker;

pub use request::{CancelFlag, RenderFault, RequestId};
pub use service::RenderHandle;
