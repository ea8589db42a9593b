//! Business services.

pub mod generation;
#[cfg(feature = "inline-render")]
pub mod inline;
pub mod script;

pub use generation::{
    DownloadLink, GenerationService, InlineRender, ScriptCreated, VideoPage, VideoView,
};
#[cfg(feature = "inline-render")]
pub use inline::InlineRenderer;
pub use script::{GeminiScriptGenerator, ScriptGenerator, ScriptOptions};
