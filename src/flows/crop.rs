// SPDX-License-Identifier: MIT

//! Crop flow - a generate / evaluate / revise loop over PPM images
//!
//! The model picks a crop rectangle with a tool, a second structured model
//! call judges the artifact against the request, and rejections are fed
//! back as conversation turns until the verdict is positive or the attempt
//! limit is reached.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::agent::{after_model_route, execute_tool_calls, CallModel, Conversation};
use crate::error::{FlowError, GraphError, ImageError, ModelError, ToolError};
use crate::graph::{Graph, GraphBuilder, Node, Transition, END, START};
use crate::message::{ImageData, Message, MessageLog};
use crate::model::{ChatModel, StructuredRequest};
use crate::registry::ToolRegistry;
use crate::state::{reducers, SessionState};
use crate::tool::Tool;

pub const CROP_DIRECTIVE: &str = "You are a photo editing assistant. Look at the \
    attached image, pick the crop rectangle that best satisfies the request, and \
    call the crop_image tool with it. Coordinates are in pixels from the top-left \
    corner.";

pub const EVALUATION_DIRECTIVE: &str = "You review crops for a photo editing \
    assistant. Compare the cropped image against the original request and the \
    source image, then answer with your verdict.";

const MISSING_ARTIFACT_FEEDBACK: &str = "No cropped image was produced. Call the \
    crop_image tool with a rectangle inside the source image.";

pub const PPM_MIME: &str = "image/x-portable-pixmap";

/// Verdict of the evaluation stage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

/// Evaluation outcome with the reviewer's feedback, if any
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Approval {
    pub status: ApprovalStatus,
    pub feedback: Option<String>,
}

impl Approval {
    pub fn pending() -> Self {
        Self::default()
    }

    pub fn approved(feedback: Option<String>) -> Self {
        Self {
            status: ApprovalStatus::Approved,
            feedback,
        }
    }

    pub fn rejected(feedback: impl Into<String>) -> Self {
        Self {
            status: ApprovalStatus::Rejected,
            feedback: Some(feedback.into()),
        }
    }
}

/// An RGB image with 8 bits per channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl RawImage {
    /// Parse a binary PPM (P6, 8-bit) image
    pub fn from_ppm(bytes: &[u8]) -> Result<Self, ImageError> {
        let mut pos = 0usize;

        let magic = next_token(bytes, &mut pos)
            .ok_or_else(|| ImageError::InvalidPpm("missing magic number".into()))?;
        if magic != b"P6" {
            return Err(ImageError::InvalidPpm(format!(
                "expected P6, got {}",
                String::from_utf8_lossy(magic)
            )));
        }

        let width = parse_header_number(bytes, &mut pos, "width")?;
        let height = parse_header_number(bytes, &mut pos, "height")?;
        let maxval = parse_header_number(bytes, &mut pos, "maxval")?;
        if maxval != 255 {
            return Err(ImageError::InvalidPpm(format!(
                "unsupported maxval {}, only 255 is handled",
                maxval
            )));
        }

        // exactly one whitespace byte separates the header from the raster
        pos += 1;

        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|n| n.checked_mul(3))
            .ok_or_else(|| ImageError::InvalidPpm("image dimensions overflow".into()))?;
        let raster = bytes.get(pos..).unwrap_or(&[]);
        if raster.len() < expected {
            return Err(ImageError::InvalidPpm(format!(
                "raster truncated: need {} bytes, have {}",
                expected,
                raster.len()
            )));
        }

        Ok(Self {
            width,
            height,
            pixels: raster[..expected].to_vec(),
        })
    }

    /// Serialize as binary PPM
    pub fn to_ppm(&self) -> Vec<u8> {
        let mut out = format!("P6\n{} {}\n255\n", self.width, self.height).into_bytes();
        out.extend_from_slice(&self.pixels);
        out
    }

    /// Cut a rectangle out of this image.
    ///
    /// The rectangle must be non-empty and lie fully inside the image.
    pub fn crop(&self, x: u32, y: u32, width: u32, height: u32) -> Result<RawImage, ImageError> {
        if width == 0 || height == 0 {
            return Err(ImageError::EmptyCrop { width, height });
        }
        let right = x.checked_add(width);
        let bottom = y.checked_add(height);
        let inside =
            matches!((right, bottom), (Some(r), Some(b)) if r <= self.width && b <= self.height);
        if !inside {
            return Err(ImageError::OutOfBounds {
                x,
                y,
                width,
                height,
                image_width: self.width,
                image_height: self.height,
            });
        }

        let mut pixels = Vec::with_capacity(width as usize * height as usize * 3);
        for row in y..y + height {
            let start = (row as usize * self.width as usize + x as usize) * 3;
            let end = start + width as usize * 3;
            pixels.extend_from_slice(&self.pixels[start..end]);
        }
        Ok(RawImage {
            width,
            height,
            pixels,
        })
    }

    /// Encode for a transcript entry or tool payload
    pub fn to_image_data(&self) -> ImageData {
        ImageData {
            mime_type: PPM_MIME.to_string(),
            data: BASE64.encode(self.to_ppm()),
        }
    }

    /// Decode from a transcript entry or tool payload
    pub fn from_image_data(image: &ImageData) -> Result<Self, ImageError> {
        let bytes = BASE64
            .decode(&image.data)
            .map_err(|e| ImageError::InvalidBase64(e.to_string()))?;
        Self::from_ppm(&bytes)
    }
}

fn next_token<'a>(bytes: &'a [u8], pos: &mut usize) -> Option<&'a [u8]> {
    // skip whitespace and # comments, which run to end of line
    loop {
        while *pos < bytes.len() && bytes[*pos].is_ascii_whitespace() {
            *pos += 1;
        }
        if *pos < bytes.len() && bytes[*pos] == b'#' {
            while *pos < bytes.len() && bytes[*pos] != b'\n' {
                *pos += 1;
            }
            continue;
        }
        break;
    }
    if *pos >= bytes.len() {
        return None;
    }
    let start = *pos;
    while *pos < bytes.len() && !bytes[*pos].is_ascii_whitespace() {
        *pos += 1;
    }
    Some(&bytes[start..*pos])
}

fn parse_header_number(bytes: &[u8], pos: &mut usize, field: &str) -> Result<u32, ImageError> {
    let token = next_token(bytes, pos)
        .ok_or_else(|| ImageError::InvalidPpm(format!("missing {}", field)))?;
    std::str::from_utf8(token)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| {
            ImageError::InvalidPpm(format!("bad {}: {}", field, String::from_utf8_lossy(token)))
        })
}

static CROP_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "properties": {
            "x": { "type": "integer", "description": "Left edge of the rectangle, in pixels" },
            "y": { "type": "integer", "description": "Top edge of the rectangle, in pixels" },
            "width": { "type": "integer", "description": "Rectangle width in pixels" },
            "height": { "type": "integer", "description": "Rectangle height in pixels" }
        },
        "required": ["x", "y", "width", "height"]
    })
});

#[derive(Deserialize)]
struct CropArgs {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
}

/// Cuts rectangles out of the flow's source image
pub struct CropTool {
    source: RawImage,
}

impl CropTool {
    pub fn new(source: RawImage) -> Self {
        Self { source }
    }
}

#[async_trait]
impl Tool for CropTool {
    fn name(&self) -> &str {
        "crop_image"
    }

    fn description(&self) -> &str {
        "Crop a rectangle out of the source image and return it"
    }

    fn schema(&self) -> &Value {
        &CROP_SCHEMA
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let args: CropArgs = serde_json::from_value(args)
            .map_err(|e| ToolError::invalid_arguments("crop_image", vec![e.to_string()]))?;
        let cropped = self
            .source
            .crop(args.x, args.y, args.width, args.height)
            .map_err(|e| ToolError::execution("crop_image", e.to_string()))?;
        Ok(json!({
            "cropped_image": cropped.to_image_data(),
            "width": cropped.width,
            "height": cropped.height
        }))
    }
}

/// State of one crop session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CropState {
    pub messages: MessageLog,
    pub source_image: Option<ImageData>,
    pub cropped_image: Option<ImageData>,
    pub approval: Approval,
    pub attempts: u32,
}

/// Update produced by one crop step; unset fields keep their value
#[derive(Debug, Default)]
pub struct CropUpdate {
    pub messages: Vec<Message>,
    pub cropped_image: Option<ImageData>,
    pub approval: Option<Approval>,
    pub attempts: Option<u32>,
}

impl SessionState for CropState {
    type Update = CropUpdate;

    fn apply(&mut self, update: CropUpdate) {
        self.messages.append(update.messages);
        reducers::replace(&mut self.cropped_image, update.cropped_image.map(Some));
        reducers::replace(&mut self.approval, update.approval);
        reducers::replace(&mut self.attempts, update.attempts);
    }
}

impl Conversation for CropState {
    fn log(&self) -> &MessageLog {
        &self.messages
    }

    fn pending_feedback(&self) -> Option<&str> {
        match self.approval.status {
            ApprovalStatus::Rejected => self.approval.feedback.as_deref(),
            _ => None,
        }
    }

    fn update_from_messages(messages: Vec<Message>) -> CropUpdate {
        CropUpdate {
            messages,
            ..CropUpdate::default()
        }
    }
}

impl CropState {
    /// Start a session from the user's request and the source image
    pub fn new(prompt: impl Into<String>, source: &RawImage) -> Self {
        let source_image = source.to_image_data();
        let mut messages = MessageLog::new();
        messages.push(Message::human_with_images(
            prompt,
            vec![source_image.clone()],
        ));
        Self {
            messages,
            source_image: Some(source_image),
            ..Self::default()
        }
    }
}

/// Model node that also counts the attempt and resets the verdict
pub struct GenerateCrop {
    inner: CallModel<CropState>,
}

impl GenerateCrop {
    pub fn new(model: Arc<dyn ChatModel>, registry: &ToolRegistry) -> Self {
        Self {
            inner: CallModel::new(model, CROP_DIRECTIVE, registry),
        }
    }
}

#[async_trait]
impl Node<CropState> for GenerateCrop {
    async fn run(&self, state: &CropState) -> Result<CropUpdate, FlowError> {
        let mut update = self.inner.run(state).await?;
        update.attempts = Some(state.attempts + 1);
        update.approval = Some(Approval::pending());
        Ok(update)
    }
}

/// Tool node that also captures the crop artifact out of the results
pub struct CropTools {
    registry: Arc<ToolRegistry>,
}

impl CropTools {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Node<CropState> for CropTools {
    async fn run(&self, state: &CropState) -> Result<CropUpdate, FlowError> {
        let results = execute_tool_calls(&state.messages, &self.registry).await?;
        let cropped_image = extract_cropped_image(&results);
        Ok(CropUpdate {
            messages: results,
            cropped_image,
            ..CropUpdate::default()
        })
    }
}

/// Last crop artifact among the results, if any call produced one
fn extract_cropped_image(results: &[Message]) -> Option<ImageData> {
    let mut found = None;
    for entry in results {
        if let Message::ToolResult {
            payload,
            is_error: false,
            ..
        } = entry
        {
            if let Some(image) = payload.get("cropped_image") {
                match serde_json::from_value(image.clone()) {
                    Ok(image) => found = Some(image),
                    Err(e) => log::warn!("Unreadable crop artifact: {}", e),
                }
            }
        }
    }
    found
}

static APPROVAL_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "properties": {
            "approved": {
                "type": "boolean",
                "description": "Whether the crop satisfies the request"
            },
            "feedback": {
                "type": "string",
                "description": "What to change if it does not"
            }
        },
        "required": ["approved", "feedback"]
    })
});

#[derive(Deserialize)]
struct Verdict {
    approved: bool,
    feedback: String,
}

/// Structured evaluation of the latest crop against the request
pub struct EvaluateCrop {
    model: Arc<dyn ChatModel>,
}

impl EvaluateCrop {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }

    fn request_text(state: &CropState) -> &str {
        for entry in state.messages.iter() {
            if let Message::Human { text, .. } = entry {
                return text;
            }
        }
        ""
    }
}

#[async_trait]
impl Node<CropState> for EvaluateCrop {
    async fn run(&self, state: &CropState) -> Result<CropUpdate, FlowError> {
        let cropped = match &state.cropped_image {
            Some(cropped) => cropped,
            None => {
                // nothing to judge; reject without a model round trip
                log::warn!("Evaluation reached without a crop artifact");
                return Ok(CropUpdate {
                    approval: Some(Approval::rejected(MISSING_ARTIFACT_FEEDBACK)),
                    ..CropUpdate::default()
                });
            }
        };

        let mut images = Vec::new();
        if let Some(source) = &state.source_image {
            images.push(source.clone());
        }
        images.push(cropped.clone());

        let mut eval_log = MessageLog::new();
        eval_log.push(Message::human_with_images(
            format!(
                "Request: {}\n\nThe first image is the source, the second is the crop. \
                 Does the crop satisfy the request?",
                Self::request_text(state)
            ),
            images,
        ));

        let verdict = self
            .model
            .complete_structured(StructuredRequest {
                directive: EVALUATION_DIRECTIVE,
                log: &eval_log,
                schema: &APPROVAL_SCHEMA,
                config: None,
            })
            .await?;
        let verdict: Verdict = serde_json::from_value(verdict).map_err(|e| {
            ModelError::invalid_response(format!("verdict does not match the schema: {}", e))
        })?;

        log::info!(
            "Crop evaluation: approved={} feedback='{}'",
            verdict.approved,
            verdict.feedback
        );
        let approval = if verdict.approved {
            Approval::approved(Some(verdict.feedback))
        } else {
            Approval::rejected(verdict.feedback)
        };
        Ok(CropUpdate {
            approval: Some(approval),
            ..CropUpdate::default()
        })
    }
}

/// Turns the reviewer's rejection into a conversation turn
pub struct InjectFeedback;

#[async_trait]
impl Node<CropState> for InjectFeedback {
    async fn run(&self, state: &CropState) -> Result<CropUpdate, FlowError> {
        let feedback = match state.pending_feedback() {
            Some(feedback) => feedback,
            None => {
                return Err(FlowError::protocol(
                    "feedback node reached without a rejection",
                ))
            }
        };
        let entry = Message::human(format!(
            "The crop was rejected: {}. Produce a new crop that addresses this.",
            feedback
        ));
        // clearing the verdict keeps the feedback from being delivered twice
        Ok(CropUpdate {
            messages: vec![entry],
            approval: Some(Approval::pending()),
            ..CropUpdate::default()
        })
    }
}

fn after_evaluation(state: &CropState, max_attempts: u32) -> Transition {
    match state.approval.status {
        ApprovalStatus::Approved => Transition::End,
        ApprovalStatus::Rejected if state.attempts < max_attempts => Transition::to("revise"),
        ApprovalStatus::Rejected => {
            log::warn!("Giving up after {} attempt(s)", state.attempts);
            Transition::End
        }
        // a verdict still pending after evaluation is unexpected; stop rather than spin
        ApprovalStatus::Pending => Transition::End,
    }
}

/// Register the crop tool bound to its source image
pub fn crop_tools(registry: &mut ToolRegistry, source: RawImage) -> Result<(), ToolError> {
    registry.register(Arc::new(CropTool::new(source)))
}

/// The crop graph: generate, run the tool, evaluate, revise until approved
pub fn crop_graph(
    model: Arc<dyn ChatModel>,
    registry: Arc<ToolRegistry>,
    max_attempts: u32,
) -> Result<Graph<CropState>, GraphError> {
    let generate = GenerateCrop::new(model.clone(), &registry);
    let tools = CropTools::new(registry);
    let evaluate = EvaluateCrop::new(model);

    GraphBuilder::new()
        .add_node("generate", generate)
        .add_node("tools", tools)
        .add_node("evaluate", evaluate)
        .add_node("revise", InjectFeedback)
        .add_edge(START, "generate")
        .add_conditional_edge(
            "generate",
            |state: &CropState| after_model_route(&state.messages, "tools", Some("evaluate")),
            &["tools", "evaluate", END],
        )
        .add_edge("tools", "evaluate")
        .add_conditional_edge(
            "evaluate",
            move |state: &CropState| after_evaluation(state, max_attempts),
            &["revise", END],
        )
        .add_edge("revise", "generate")
        .compile()
}
