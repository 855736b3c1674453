//! Binary request/response framing over UDP (spec.md §4.2, §6).

pub mod codec;
pub mod messages;

pub use codec::{decode, encode};
pub use messages::{Frame, MethodCall, MethodResult, StoreArgs};
