//! Generative-service clients: text completion and image generation.

pub mod http;
pub mod image;
pub mod provider;

pub use image::{GeneratedImage, ImageProvider, ImageRequest};
pub use provider::{CompletionRequest, CompletionResponse, LlmError, LlmProvider};
