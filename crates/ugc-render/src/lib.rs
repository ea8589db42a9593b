//! Client for the external text/image-to-video render provider.
//!
//! This crate provides:
//! - [`RenderProvider`], the seam the worker drives
//! - An HTTP implementation for task-style generation APIs
//! - Normalization of provider job ids, states and progress
//! - Style-specific prompt templates

pub mod client;
pub mod error;
pub mod parse;
pub mod prompt;
pub mod provider;

pub use client::{HttpRenderClient, RenderClientConfig};
pub use error::{RenderError, RenderResult};
pub use parse::{map_state, normalize_progress, parse_job_id, parse_status, JobIdParseError};
pub use prompt::{build_prompt, build_request};
pub use provider::{
    GenerationMode, ProviderStatus, RenderProvider, RenderRequest, RenderState,
    DEFAULT_ASPECT_RATIO,
};
