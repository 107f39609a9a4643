//! Civic Speech - command-line speaker
//!
//! Speaks text through the configured backend using the same engine the
//! study app uses, which makes backend quirks easy to reproduce.

use anyhow::Result;
use civic_speech::config::{Config, RatePreset};
use civic_speech::tts::create_backend;
use civic_speech::{safe_speak, SpeakOptions, SpeakOutcome, SpeechEngine, VoiceCatalog};
use clap::Parser;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Text to speak
    text: Vec<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Speech backend (espeak, speechd_ng)
    #[arg(short, long)]
    backend: Option<String>,

    /// Language tag, e.g. en-US
    #[arg(short, long)]
    lang: Option<String>,

    /// Speaking rate preset (slow, normal, fast)
    #[arg(short, long)]
    rate: Option<RatePreset>,

    /// Voice name to use instead of automatic selection
    #[arg(long)]
    voice: Option<String>,

    /// List available voices and exit
    #[arg(long)]
    list_voices: bool,

    /// Persist the given options as the new defaults
    #[arg(long)]
    save_config: bool,
}

/// `RUST_LOG` wins, then `--verbose`, then the configured level
fn log_directive(rust_log: Option<String>, verbose: bool, configured: &str) -> String {
    match rust_log {
        Some(directive) if !directive.trim().is_empty() => directive,
        _ if verbose => "debug".to_string(),
        _ => configured.to_string(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = Config::load()?;

    // Setup logging
    let directive = log_directive(
        std::env::var(EnvFilter::DEFAULT_ENV).ok(),
        args.verbose,
        &config.log_level,
    );
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("🗣️ Civic Speech v{} starting...", env!("CARGO_PKG_VERSION"));

    if let Some(backend) = args.backend {
        config.backend = backend;
    }
    if let Some(lang) = args.lang {
        config.lang = lang;
    }
    if let Some(rate) = args.rate {
        config.rate = rate;
    }
    if let Some(voice) = &args.voice {
        config.preferred_voice = Some(voice.clone());
    }

    if args.save_config {
        config.save()?;
        info!("💾 Saved config to {}", civic_speech::config::config_path().display());
    }

    let backend = create_backend(&config).await?;
    let catalog = Arc::new(VoiceCatalog::new());
    let engine = SpeechEngine::new(Some(backend), catalog, config.engine_defaults());

    if args.list_voices {
        let voices = engine.load_voices().await;
        if voices.is_empty() {
            println!("No voices reported by backend");
        }
        for voice in voices.iter() {
            let local = if voice.local_service { "local" } else { "network" };
            println!("{:<30} {:<10} {}", voice.name, voice.lang, local);
        }
        return Ok(());
    }

    let text = args.text.join(" ");
    if text.trim().is_empty() {
        if !args.save_config {
            warn!("⚠️ Nothing to speak");
        }
        return Ok(());
    }

    let mut options = SpeakOptions::default();
    if let Some(name) = &args.voice {
        let voices = engine.load_voices().await;
        match voices.iter().find(|v| v.name.eq_ignore_ascii_case(name)) {
            Some(voice) => options = options.with_voice(voice.clone()),
            None => warn!("⚠️ Voice '{}' not found, selecting automatically", name),
        }
    }

    let interrupt = engine.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("🛑 Interrupted");
            interrupt.cancel();
        }
    });

    let outcome = safe_speak(&engine, &text, options).await;
    engine.destroy();
    info!("🏁 Speech {}", outcome);

    match outcome {
        SpeakOutcome::Completed => Ok(()),
        SpeakOutcome::Cancelled => std::process::exit(130),
        SpeakOutcome::Error => std::process::exit(1),
    }
}
