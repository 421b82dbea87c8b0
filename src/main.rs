//! Demo binary for the two bundled flows: a calculator tool loop and a
//! crop approval loop over PPM images.

use anyhow::Context;
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use std::path::PathBuf;
use std::sync::Arc;

use stategraph_rs::flows::calculator::{calculator_graph, calculator_tools, ChatState};
use stategraph_rs::flows::crop::{crop_graph, crop_tools, ApprovalStatus, CropState, RawImage};
use stategraph_rs::model::gemini::GeminiModel;
use stategraph_rs::model::openai::OpenAIModel;
use stategraph_rs::{ChatModel, Message, MessageLog, ToolRegistry};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Answer an arithmetic question with the calculator tools
    Calc {
        /// The question to answer
        prompt: String,

        /// Model name; a gpt prefix selects OpenAI, anything else Gemini
        #[arg(short, long, default_value = "gemini-1.5-flash")]
        model: String,

        /// Abort the run after this many node executions
        #[arg(long, default_value_t = 20)]
        step_limit: u32,
    },
    /// Crop a PPM image until the reviewer model approves
    Crop {
        /// Path to the source image (binary PPM)
        image: PathBuf,

        /// What the crop should show
        #[arg(
            short,
            long,
            default_value = "Crop the image to its most interesting region"
        )]
        prompt: String,

        /// Where to write the approved crop
        #[arg(short, long, default_value = "cropped.ppm")]
        out: PathBuf,

        /// Model name; a gpt prefix selects OpenAI, anything else Gemini
        #[arg(short, long, default_value = "gemini-1.5-flash")]
        model: String,

        /// Give up after this many rejected attempts
        #[arg(long, default_value_t = 3)]
        max_attempts: u32,

        /// Abort the run after this many node executions
        #[arg(long, default_value_t = 30)]
        step_limit: u32,
    },
}

/// Pick the provider from `MODEL_PROVIDER` or the model name prefix
fn build_model(model_name: &str) -> anyhow::Result<Arc<dyn ChatModel>> {
    let provider = std::env::var("MODEL_PROVIDER").unwrap_or_else(|_| {
        if model_name.starts_with("gpt") {
            "openai".to_string()
        } else {
            "gemini".to_string()
        }
    });
    log::info!("Using provider '{}' with model '{}'", provider, model_name);
    match provider.as_str() {
        "openai" => Ok(Arc::new(OpenAIModel::new(model_name.to_string())?)),
        _ => Ok(Arc::new(GeminiModel::new(model_name.to_string())?)),
    }
}

fn print_transcript(log: &MessageLog) {
    for entry in log.iter() {
        match entry {
            Message::Human { text, images } => {
                if images.is_empty() {
                    println!("user: {}", text);
                } else {
                    println!("user: {} [{} image(s)]", text, images.len());
                }
            }
            Message::System { text } => println!("system: {}", text),
            Message::Assistant(turn) => {
                if turn.has_tool_calls() {
                    for call in &turn.tool_calls {
                        println!("assistant: call {} {}", call.name, call.args);
                    }
                } else {
                    println!("assistant: {}", turn.text);
                }
            }
            Message::ToolResult {
                name,
                payload,
                is_error,
                ..
            } => {
                let rendered = payload.to_string();
                let short = match rendered.char_indices().nth(200) {
                    Some((idx, _)) => format!("{}...", &rendered[..idx]),
                    None => rendered,
                };
                if *is_error {
                    println!("tool {} (error): {}", name, short);
                } else {
                    println!("tool {}: {}", name, short);
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init();

    let args = Args::parse();

    match args.command {
        Commands::Calc {
            prompt,
            model,
            step_limit,
        } => {
            let model = build_model(&model)?;
            let mut registry = ToolRegistry::new();
            calculator_tools(&mut registry)?;

            let graph = calculator_graph(model, Arc::new(registry))?.with_step_limit(step_limit);
            let state = graph.run(ChatState::from_prompt(prompt)).await?;

            print_transcript(&state.messages);
            match state.final_reply() {
                Some(reply) => println!("\n{}", reply),
                None => println!("\n(no final reply)"),
            }
        }
        Commands::Crop {
            image,
            prompt,
            out,
            model,
            max_attempts,
            step_limit,
        } => {
            let bytes =
                std::fs::read(&image).with_context(|| format!("reading {}", image.display()))?;
            let source = RawImage::from_ppm(&bytes)?;
            log::info!("Loaded {}x{} source image", source.width, source.height);

            let model = build_model(&model)?;
            let mut registry = ToolRegistry::new();
            crop_tools(&mut registry, source.clone())?;

            let graph =
                crop_graph(model, Arc::new(registry), max_attempts)?.with_step_limit(step_limit);
            let state = graph.run(CropState::new(prompt, &source)).await?;

            print_transcript(&state.messages);
            match (state.approval.status, &state.cropped_image) {
                (ApprovalStatus::Approved, Some(artifact)) => {
                    let cropped = RawImage::from_image_data(artifact)?;
                    std::fs::write(&out, cropped.to_ppm())
                        .with_context(|| format!("writing {}", out.display()))?;
                    println!(
                        "\nApproved: wrote {}x{} crop to {}",
                        cropped.width,
                        cropped.height,
                        out.display()
                    );
                }
                _ => {
                    let feedback = state.approval.feedback.as_deref().unwrap_or("no feedback");
                    println!("\nNot approved: {}", feedback);
                }
            }
        }
    }

    Ok(())
}
