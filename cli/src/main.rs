use anyhow::Result;
use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use jarvis_core::{
    AgentLoop, ContextBuilder, InMemorySessionStore, Provider, SpeechToText, TextToSpeech, config,
    memory, providers, tools,
};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod onboard;
mod server;
mod speech;

#[derive(Parser)]
#[command(name = "jarvis")]
#[command(about = "Jarvis - a conversational assistant with tools, voice and long-term memory", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive setup of ~/.jarvis/config.toml
    Init,
    /// Chat in the terminal
    Chat {
        #[arg(short, long)]
        message: Option<String>,
        #[arg(short, long, default_value = "default_session")]
        session: String,
        /// Also speak each reply into this MP3 file
        #[arg(long, value_name = "OUT.mp3")]
        speak: Option<PathBuf>,
    },
    /// Run the HTTP API
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Transcribe an audio file
    Transcribe { file: PathBuf },
    /// Synthesize speech into an MP3 file
    Speak {
        text: String,
        #[arg(short, long, default_value = "speech.mp3")]
        out: PathBuf,
    },
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn build_agent(config: &config::Config) -> Result<Arc<AgentLoop>> {
    let provider: Arc<dyn Provider> = Arc::from(providers::create_provider(&config.llm)?);

    if let Err(e) = std::fs::create_dir_all(&config.workspace_dir) {
        tracing::warn!(
            "Could not create workspace at {}: {}",
            config.workspace_dir.display(),
            e
        );
    }

    let sessions =
        Arc::new(InMemorySessionStore::new().with_max_messages(config.agent.max_history));
    let mut agent = AgentLoop::new(
        provider.clone(),
        Arc::new(tools::default_registry()?),
        sessions,
    )
    .with_context_builder(ContextBuilder::new().with_workspace(&config.workspace_dir))
    .with_max_turns(config.agent.max_turns)
    .with_memory_top_k(config.memory.top_k);

    match memory::create_memory(&config.memory, provider).await? {
        Some(memory) => agent = agent.with_memory(memory),
        None => tracing::info!("Long-term memory disabled"),
    }

    Ok(Arc::new(agent))
}

async fn print_reply(
    agent: &Arc<AgentLoop>,
    session: &str,
    message: &str,
    speaker: Option<&speech::Speaker>,
) -> Result<()> {
    let mut fragments = agent.respond(session, message);
    let utterance = speaker.map(speech::Speaker::start);
    let mut stdout = std::io::stdout();
    while let Some(fragment) = fragments.next().await {
        let fragment = fragment?;
        write!(stdout, "{}", fragment)?;
        stdout.flush()?;
        if let Some(utterance) = &utterance {
            utterance.feed(&fragment);
        }
    }
    writeln!(stdout)?;

    if let Some(utterance) = utterance {
        let bytes = utterance.finish().await?;
        tracing::info!("Spoke {} bytes of audio", bytes);
    }
    Ok(())
}

async fn run_chat(
    config: config::Config,
    message: Option<String>,
    session: String,
    speak: Option<PathBuf>,
) -> Result<()> {
    let speaker = match speak {
        Some(out) => Some(speech::Speaker::new(
            TextToSpeech::from_config(&config.tts)?,
            out,
        )),
        None => None,
    };
    let speaker = speaker.as_ref();
    let agent = build_agent(&config).await?;

    if let Some(msg) = message {
        return print_reply(&agent, &session, &msg, speaker).await;
    }

    println!("Jarvis");
    println!("Type your message (Ctrl+D to exit):\n");
    let stdin = std::io::stdin();

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let mut input = String::new();
        match stdin.lock().read_line(&mut input) {
            Ok(0) | Err(_) => {
                println!("\nGoodbye!");
                break;
            }
            Ok(_) => {
                let input = input.trim();
                if input.is_empty() {
                    continue;
                }
                if let Err(e) = print_reply(&agent, &session, input, speaker).await {
                    eprintln!("\nError: {:#}", e);
                }
                println!();
            }
        }
    }

    Ok(())
}

async fn run_serve(config: config::Config, host: Option<String>, port: Option<u16>) -> Result<()> {
    let agent = build_agent(&config).await?;

    let stt = SpeechToText::from_config(&config.stt)
        .map_err(|e| tracing::warn!("Transcription disabled: {}", e))
        .ok();
    let tts = TextToSpeech::from_config(&config.tts)
        .map_err(|e| tracing::warn!("Speech synthesis disabled: {}", e))
        .ok();

    let host = host.unwrap_or(config.api.host);
    let port = port.unwrap_or(config.api.port);
    let state = Arc::new(server::AppState { agent, stt, tts });
    server::serve(state, &host, port).await
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let command = cli.command.unwrap_or_else(|| {
        if config::config_exists() {
            Commands::Chat {
                message: None,
                session: "default_session".to_string(),
                speak: None,
            }
        } else {
            Commands::Init
        }
    });

    match command {
        Commands::Init => {
            let config = onboard::run_init()?;
            config::save_config(&config)?;
        }
        Commands::Chat {
            message,
            session,
            speak,
        } => {
            run_chat(config::Config::load()?, message, session, speak).await?;
        }
        Commands::Serve { host, port } => {
            run_serve(config::Config::load()?, host, port).await?;
        }
        Commands::Transcribe { file } => {
            let config = config::Config::load()?;
            let text = SpeechToText::from_config(&config.stt)?
                .transcribe_file(&file)
                .await?;
            println!("{}", text);
        }
        Commands::Speak { text, out } => {
            let config = config::Config::load()?;
            let audio = TextToSpeech::from_config(&config.tts)?
                .synthesize(&text)
                .await?;
            tokio::fs::write(&out, &audio).await?;
            println!("Saved {} bytes of audio to {}", audio.len(), out.display());
        }
    }

    Ok(())
}
