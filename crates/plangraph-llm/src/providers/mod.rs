pub mod openai;
pub mod presets;

pub use openai::OpenAiClient;
pub use presets::{get_preset, ProviderPreset};
