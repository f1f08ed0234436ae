use clap::{Args, Parser, Subcommand};
use rgenimg::{
    cost::{self, SessionCost},
    logger::{self, LoggerConfig},
    models::{GenerationRequest, AVAILABLE_MODELS, DEFAULT_OUTPUT_PATH},
    GeminiConfig, ImageClient, ImageGenerator, Result,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

/// Generate images with Gemini and keep track of what they cost
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate one image from a prompt, optionally editing an input image
    Generate(GenerateArgs),
    /// List the supported models and their pricing
    Models,
    /// Run the HTTP interface
    #[cfg(feature = "server")]
    Serve(ServeArgs),
}

#[derive(Args, Debug)]
struct GenerateArgs {
    /// Text prompt describing the image
    #[arg(required_unless_present = "list_models")]
    prompt: Option<String>,

    /// Input image to edit
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Where to write the generated image
    #[arg(short, long, default_value = DEFAULT_OUTPUT_PATH)]
    output: PathBuf,

    /// API key (falls back to GEMINI_API_KEY)
    #[arg(long)]
    api_key: Option<String>,

    /// Model id (falls back to GEMINI_MODEL, then the recommended model)
    #[arg(long)]
    model: Option<String>,

    /// List available models and exit
    #[arg(long)]
    list_models: bool,
}

#[cfg(feature = "server")]
#[derive(Args, Debug)]
struct ServeArgs {
    /// Bind address (falls back to HOST)
    #[arg(long)]
    host: Option<String>,

    /// Port (falls back to PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Folder for uploaded input images (falls back to UPLOAD_FOLDER)
    #[arg(long)]
    upload_dir: Option<PathBuf>,

    /// Folder for generated images (falls back to OUTPUT_FOLDER)
    #[arg(long)]
    output_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenv::dotenv();
    let cli = Cli::parse();

    let mut log_config = LoggerConfig::default().with_env_level();
    if cli.verbose {
        log_config = log_config.with_level(logger::LogLevel::Debug);
    }
    if let Err(e) = logger::init_with_config(log_config) {
        eprintln!("Failed to initialize logger: {}", e);
    }

    let outcome = match cli.command {
        Command::Generate(args) if args.list_models => {
            list_models();
            Ok(())
        }
        Command::Generate(args) => generate(args).await,
        Command::Models => {
            list_models();
            Ok(())
        }
        #[cfg(feature = "server")]
        Command::Serve(args) => serve(args).await,
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn list_models() {
    println!("{}", cost::format_catalog(AVAILABLE_MODELS));
}

async fn generate(args: GenerateArgs) -> Result<()> {
    let mut config = GeminiConfig::from_env();
    if let Some(api_key) = args.api_key {
        config = config.with_api_key(api_key);
    }
    if let Some(model) = args.model {
        config = config.with_model(model);
    }
    let api_key = config.resolve_api_key()?;
    let config = config.with_api_key(api_key);

    let mut request = GenerationRequest::new(args.prompt.unwrap_or_default())
        .with_model(config.model.clone())
        .with_output(args.output);
    if let Some(input) = args.input {
        request = request.with_input_image(input);
    }

    let backend = Arc::new(ImageClient::new(&config)?);
    let generator = ImageGenerator::new(backend, Arc::new(SessionCost::new()));

    let charge = generator.charge(&request)?;
    println!("🎨 Generating image with {}", charge.model.name);
    println!("{}", cost::format_breakdown(&charge.cost, charge.session_total));

    let image = generator.execute(&request, charge).await?;
    println!(
        "✅ Success! Generated image saved to: {}",
        image.path.display()
    );
    Ok(())
}

#[cfg(feature = "server")]
async fn serve(args: ServeArgs) -> Result<()> {
    use rgenimg::{server, ServerConfig};

    let mut config = ServerConfig::from_env();
    if let Some(host) = args.host {
        config = config.with_host(host);
    }
    if let Some(port) = args.port {
        config = config.with_port(port);
    }
    let upload_dir = args.upload_dir.unwrap_or_else(|| config.upload_dir.clone());
    let output_dir = args.output_dir.unwrap_or_else(|| config.output_dir.clone());
    let config = config.with_folders(upload_dir, output_dir);

    server::run(server::AppState::for_gemini(config, GeminiConfig::from_env())).await?;
    Ok(())
}
