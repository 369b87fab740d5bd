//! Data records exchanged between the gateway core and its HTTP boundary.
//!
//! None of these are persisted by the gateway; the blob store owns object
//! state and everything here is derived from it per request.

pub mod object;
pub mod signed_url;
pub mod upload;
