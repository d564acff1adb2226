//! Thin HTTP clients wrapping the `oemwatch-fetch` and `oemwatch-render`
//! collaborator services behind the wire contracts defined in
//! `oemwatch_common::api` (§0 PROCESS LAYOUT).

mod fetch_client;
mod render_client;

pub use fetch_client::{FetchClient, FetchClientError};
pub use render_client::{RenderClient, RenderClientError};
