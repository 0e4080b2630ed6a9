//! Posting, addressing and markup for anonymous threaded boards.
//!
//! The entry point for writes is [post::Poster], which validates a post,
//! derives the poster's identity, and hands the result to a
//! [models::Store] that numbers it. Stored text is turned into markup with
//! [parse::render_content].

pub mod address;
pub mod config;
pub mod error;
pub mod ident;
pub mod logging;
pub mod models;
pub mod parse;
pub mod post;
pub mod query;
pub mod schema;
pub mod validate;

pub use crate::config::Config;
pub use crate::error::{Error, Result};
pub use crate::post::{PostForm, Posted, Poster};
