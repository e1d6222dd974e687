use anyhow::{bail, Context, Result};
use persona_tts::tts::{load_config, SynthesisRequest, TtsService};
use std::path::PathBuf;

const USAGE: &str = "usage:
  persona-tts speak <text> [--persona NAME] [--language CODE] [--enhance] [--out FILE]
  persona-tts voices
  persona-tts health

The config is read from $PERSONA_TTS_CONFIG or <data dir>/persona-tts/tts_config.json.";

fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("PERSONA_TTS_CONFIG") {
        return PathBuf::from(path);
    }
    dirs_next::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("persona-tts")
        .join("tts_config.json")
}

struct SpeakArgs {
    request: SynthesisRequest,
    out: PathBuf,
}

fn parse_speak(args: &[String]) -> Result<SpeakArgs> {
    let mut text = None;
    let mut persona = None;
    let mut language = "en".to_string();
    let mut enhance = false;
    let mut out = None;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--persona" => persona = Some(iter.next().context("--persona needs a value")?.clone()),
            "--language" => language = iter.next().context("--language needs a value")?.clone(),
            "--out" => out = Some(PathBuf::from(iter.next().context("--out needs a value")?)),
            "--enhance" => enhance = true,
            flag if flag.starts_with("--") => bail!("unknown flag {}\n{}", flag, USAGE),
            value => {
                if text.is_some() {
                    bail!("text given twice\n{}", USAGE);
                }
                text = Some(value.to_string());
            }
        }
    }

    let mut request = SynthesisRequest::new(text.context(USAGE)?, language).enhance(enhance);
    request.persona = persona;
    Ok(SpeakArgs {
        request,
        out: out.unwrap_or_else(|| PathBuf::from("speech")),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    persona_tts::init_logging();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        bail!(USAGE);
    };

    let config = load_config(&config_path());
    let service = TtsService::from_config(&config).context("failed to build TTS service")?;

    match command.as_str() {
        "speak" => {
            let SpeakArgs { request, mut out } = parse_speak(&args[1..])?;
            service.preload().await;
            let result = service.handle(&request).await?;

            if out.extension().is_none() {
                out.set_extension(if result.mime_type == "audio/wav" { "wav" } else { "mp3" });
            }
            std::fs::write(&out, &result.audio_bytes)
                .with_context(|| format!("failed to write {}", out.display()))?;

            for (name, value) in result.metadata() {
                println!("{}: {}", name, value);
            }
            println!("wrote {} bytes to {}", result.audio_bytes.len(), out.display());
        }
        "voices" => {
            println!("{}", serde_json::to_string_pretty(&service.list_voices())?);
        }
        "health" => {
            println!("{}", serde_json::to_string_pretty(&service.health().await)?);
        }
        other => bail!("unknown command {}\n{}", other, USAGE),
    }
    Ok(())
}
