//! Answer synthesis: three mutually exclusive variants per run. Each
//! builds its final prompt, produces the answer (optionally streaming
//! fragments to a sink), and always leaves `final_answer` set.

pub(super) mod sources;

use tracing::{error, info, warn};

use self::sources::SourceReference;
use super::{Agent, AgentState};
use crate::application::context::{self, prompts};
use crate::domain::types::ContextFile;
use crate::infrastructure::model::{ModelProvider, ModelRequest, TokenSink};
use crate::render;

impl<P: ModelProvider> Agent<P> {
    /// Tool-grounded answer: citation-ready context from the shape
    /// matchers, source references, and an inline-image manifest. An
    /// empty model response degrades to a deterministic fallback listing
    /// the sources rather than silently returning nothing.
    pub(super) async fn answer_with_tools(
        &self,
        state: &mut AgentState<'_>,
        sink: Option<&dyn TokenSink>,
    ) {
        let grounding = sources::collect_grounding(&state.context_files, &state.tool_results);
        let context_text = grounding.sections.join("\n\n---\n\n");

        let references_text = grounding
            .references
            .iter()
            .map(|reference| {
                format!("- {}: {} - {}", reference.id, reference.title, reference.url)
            })
            .collect::<Vec<_>>()
            .join("\n");

        let images_text = if grounding.images.is_empty() {
            String::new()
        } else {
            let lines = grounding
                .images
                .iter()
                .map(|image| {
                    format!(
                        "- Image from {}: {} (Caption: {})",
                        image.source_id, image.url, image.caption
                    )
                })
                .collect::<Vec<_>>()
                .join("\n");
            format!("\n\n**Available Images:**\n{lines}")
        };

        let prompt = prompts::answer_with_tools(
            &state.system_context,
            &state.query,
            &context_text,
            &references_text,
            &images_text,
        );

        info!(
            sources = grounding.references.len(),
            images = grounding.images.len(),
            context_chars = context_text.len(),
            "generating final answer with tools"
        );

        let request = ModelRequest::for_stage(&self.settings.stages.answer, prompt);
        match self.run_completion(request, sink).await {
            Ok(text) => {
                let text = render::normalize_math_delimiters(&text);
                let answer = if text.trim().is_empty() {
                    warn!("model generated empty response, creating fallback answer");
                    fallback_answer(&grounding.references)
                } else {
                    text
                };
                info!(chars = answer.len(), "generated final answer");
                state.final_answer = Some(answer);
            }
            Err(err) => {
                error!(%err, "answer generation failed");
                state.final_answer =
                    Some(format!("Error generating answer: {}", err.user_message()));
            }
        }
    }

    /// Direct answer from model knowledge, full conversation history, and
    /// full file content; no tool grounding.
    pub(super) async fn answer_no_tools(
        &self,
        state: &mut AgentState<'_>,
        sink: Option<&dyn TokenSink>,
    ) {
        let history_context =
            context::build_conversation_context(&state.history, self.settings.history_window);
        let files_context = context::build_files_context_full(&state.context_files);

        let prompt = prompts::answer_no_tools(
            &state.system_context,
            &state.query,
            &history_context,
            &files_context,
        );

        let request = ModelRequest::for_stage(&self.settings.stages.answer_direct, prompt);
        match self.run_completion(request, sink).await {
            Ok(text) => {
                let answer = render::normalize_math_delimiters(&text);
                info!(chars = answer.len(), "generated answer without tools");
                state.final_answer = Some(answer);
            }
            Err(err) => {
                error!(%err, "answer generation failed");
                state.final_answer =
                    Some(format!("Error generating answer: {}", err.user_message()));
            }
        }
    }

    /// Vision-grounded answer over uploaded images. Fixed answers (and no
    /// model call) when no image or no usable image data is present.
    pub(super) async fn answer_with_vision(
        &self,
        state: &mut AgentState<'_>,
        sink: Option<&dyn TokenSink>,
    ) {
        let image_files: Vec<&ContextFile> = state
            .context_files
            .iter()
            .filter(|file| file.is_image())
            .collect();

        if image_files.is_empty() {
            warn!("vision stage reached but no images found in context");
            state.final_answer = Some("No images were found to analyze.".to_string());
            return;
        }

        let mut images = Vec::with_capacity(image_files.len());
        for file in &image_files {
            match &file.inline_data {
                Some(data) => images.push(data.clone()),
                None => warn!(name = %file.name, "image has no inline data"),
            }
        }

        if images.is_empty() {
            error!("no usable image data found");
            state.final_answer = Some("Unable to load image data for analysis.".to_string());
            return;
        }

        let history_context =
            context::build_conversation_context(&state.history, self.settings.history_window);
        let prompt = prompts::answer_with_vision(
            &state.system_context,
            &state.query,
            image_files.len(),
            &history_context,
        );

        info!(
            images = images.len(),
            model = %self.settings.stages.vision.model,
            "analyzing uploaded image(s) with vision model"
        );

        let request =
            ModelRequest::for_stage(&self.settings.stages.vision, prompt).with_images(images);
        match self.run_completion(request, sink).await {
            Ok(text) => {
                let answer = render::normalize_math_delimiters(&text);
                info!(chars = answer.len(), "vision analysis complete");
                state.final_answer = Some(answer);
            }
            Err(err) => {
                error!(%err, "vision answer generation failed");
                state.final_answer =
                    Some(format!("Error analyzing image: {}", err.user_message()));
            }
        }
    }
}

fn fallback_answer(references: &[SourceReference]) -> String {
    let mut fallback = String::from(
        "I apologize, but I was unable to generate a complete answer based on the available information. ",
    );
    if references.is_empty() {
        fallback.push_str(
            "The search results did not contain sufficient information to answer your question directly. \
             Please try rephrasing your question or provide more specific details.",
        );
    } else {
        fallback.push_str("However, I found these relevant sources:\n\n");
        for reference in references {
            fallback.push_str(&format!("- [{}]({})\n", reference.title, reference.url));
        }
    }
    fallback
}
