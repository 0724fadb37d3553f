use serde::Deserialize;

const DEFAULT_TEXT_MODEL: &str = "gpt-oss:20b-65k";
const DEFAULT_VISION_MODEL: &str = "gemma3:12b";

/// Model assignment for one pipeline stage.
#[derive(Debug, Clone, Deserialize)]
pub struct StageModelConfig {
    pub model: String,
    pub temperature: f32,
}

impl StageModelConfig {
    fn new(model: &str, temperature: f32) -> Self {
        Self {
            model: model.to_string(),
            temperature,
        }
    }
}

/// Per-stage model table. Each stage of the pipeline can run on a
/// different model and sampling temperature; routing decisions run cold,
/// answer generation slightly warmer, and the vision stage needs a
/// multimodal-capable model.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StageModels {
    pub decide: StageModelConfig,
    pub select: StageModelConfig,
    pub evaluate: StageModelConfig,
    pub answer: StageModelConfig,
    pub answer_direct: StageModelConfig,
    pub vision: StageModelConfig,
}

impl Default for StageModels {
    fn default() -> Self {
        Self {
            decide: StageModelConfig::new(DEFAULT_TEXT_MODEL, 0.1),
            select: StageModelConfig::new(DEFAULT_TEXT_MODEL, 0.2),
            evaluate: StageModelConfig::new(DEFAULT_TEXT_MODEL, 0.1),
            answer: StageModelConfig::new(DEFAULT_TEXT_MODEL, 0.3),
            answer_direct: StageModelConfig::new(DEFAULT_TEXT_MODEL, 0.3),
            vision: StageModelConfig::new(DEFAULT_VISION_MODEL, 0.3),
        }
    }
}
