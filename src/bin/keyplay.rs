//! keyplay — play a scripted key sequence through the piano core and write
//! what the capture sink heard to a WAV file.

use std::cell::RefCell;
use std::error::Error;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pianokeys_core::dsp::renderer::encode_wav;
#[cfg(feature = "remote")]
use pianokeys_core::sample_bank::HttpSampleSource;
use pianokeys_core::sample_bank::DirectorySampleSource;
use pianokeys_core::{
    InputController, InputEvent, KeyMap, PianoConfig, PianoError, SampleBank, SampleBankLoader,
    SampleSource, VoiceEngine,
};

#[derive(Parser)]
#[command(version, about = "Play computer-key sequences on a sampled piano.")]
struct Cli {
    /// JSON config file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Directory with one folder of samples per instrument.
    #[arg(short, long)]
    samples: Option<PathBuf>,
    /// Sample server base URL; takes precedence over the sample directory.
    #[cfg(feature = "remote")]
    #[arg(long)]
    server: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lists the instruments the sample source offers.
    Instruments {},
    /// Renders a key sequence to a WAV file.
    Play {
        /// Space separated steps: `q+` presses q, `q-` releases it, `>` and `<`
        /// shift the octave, `_` rests. Each step lasts one step length.
        sequence: String,
        /// Output WAV path.
        #[arg(short, long, default_value = "take.wav")]
        out: PathBuf,
        /// Instrument folder to load (config default otherwise).
        #[arg(short, long)]
        instrument: Option<String>,
        /// Seconds per step.
        #[arg(long, default_value_t = 0.25)]
        step: f64,
        /// Seconds rendered after the last step.
        #[arg(long, default_value_t = 2.0)]
        tail: f64,
        /// Leave released notes ringing.
        #[arg(long)]
        sustain: bool,
        /// Use the soft attack gain.
        #[arg(long)]
        soften: bool,
    },
}

/// One step of a key sequence.
#[derive(Debug, Clone, PartialEq)]
enum Step {
    Press(String),
    Release(String),
    OctaveUp,
    OctaveDown,
    Rest,
}

fn parse_sequence(sequence: &str) -> Result<Vec<Step>, String> {
    sequence
        .split_whitespace()
        .map(|token| match token {
            ">" => Ok(Step::OctaveUp),
            "<" => Ok(Step::OctaveDown),
            "_" => Ok(Step::Rest),
            _ => {
                if let Some(key) = token.strip_suffix('+').filter(|k| !k.is_empty()) {
                    Ok(Step::Press(key.to_string()))
                } else if let Some(key) = token.strip_suffix('-').filter(|k| !k.is_empty()) {
                    Ok(Step::Release(key.to_string()))
                } else {
                    Err(format!("Unrecognized step '{token}'"))
                }
            }
        })
        .collect()
}

/// Options for rendering one take.
struct Take {
    steps: Vec<Step>,
    step_seconds: f64,
    tail_seconds: f64,
    sustain: bool,
    soften: bool,
}

/// Replay `take` through a fresh engine and return what the capture sink heard.
fn render_take(config: &PianoConfig, bank: Arc<SampleBank>, take: &Take) -> Result<Vec<f32>, PianoError> {
    let graph = Rc::new(RefCell::new(config.audio_engine()));
    graph.borrow_mut().start_capture();
    let player = VoiceEngine::new(graph.clone(), config.voice);
    let mut controller = InputController::new(KeyMap::default(), player);
    controller.set_sustain(take.sustain || config.sustain);
    controller.set_soften(take.soften || config.soften);
    controller.set_sample_bank(bank);

    for s in &take.steps {
        let result = match s {
            Step::Press(key) => controller.handle(&InputEvent::key_down(key)).map(drop),
            Step::Release(key) => controller.handle(&InputEvent::key_up(key)).map(drop),
            Step::OctaveUp => {
                controller.shift_octave_up();
                Ok(())
            }
            Step::OctaveDown => {
                controller.shift_octave_down();
                Ok(())
            }
            Step::Rest => Ok(()),
        };
        match result {
            Err(PianoError::Voice(e)) => warn!(step = ?s, error = %e, "Step produced no sound"),
            other => other?,
        }
        graph.borrow_mut().render_seconds(take.step_seconds);
        controller.reap_finished();
    }

    graph.borrow_mut().render_seconds(take.tail_seconds);
    let captured = graph.borrow_mut().take_capture();
    Ok(captured)
}

async fn run<S: SampleSource>(
    loader: SampleBankLoader<S>,
    command: Commands,
    config: &PianoConfig,
) -> Result<(), Box<dyn Error>> {
    match command {
        Commands::Instruments {} => {
            let names = loader.instrument_names().await?;
            println!("Instruments (count: {}):", names.len());
            for name in names {
                println!("- {name}");
            }
        }
        Commands::Play {
            sequence,
            out,
            instrument,
            step,
            tail,
            sustain,
            soften,
        } => {
            let take = Take {
                steps: parse_sequence(&sequence)?,
                step_seconds: step,
                tail_seconds: tail,
                sustain,
                soften,
            };
            let instrument = instrument.unwrap_or_else(|| config.default_instrument.clone());
            let bank = loader.load(&instrument).await?;

            let captured = render_take(config, bank, &take)?;
            let wav = encode_wav(&captured, config.sample_rate)?;
            std::fs::write(&out, wav)?;
            info!(path = ?out, seconds = captured.len() as f64 / config.sample_rate as f64, "Wrote take");
        }
    }

    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => PianoConfig::load(path)?,
        None => PianoConfig::default(),
    };

    #[cfg(feature = "remote")]
    if let Some(server) = cli.server.clone() {
        info!(server = server.as_str(), "Using sample server");
        let loader = SampleBankLoader::new(HttpSampleSource::new(server));
        return run(loader, cli.command, &config).await;
    }

    let root = cli
        .samples
        .clone()
        .or_else(|| config.resolved_sample_root())
        .ok_or("No sample directory configured")?;
    run(SampleBankLoader::new(DirectorySampleSource::new(root)), cli.command, &config).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_steps() {
        let steps = parse_sequence("q+ w+  q- _ > ,+ ,- <").unwrap();
        assert_eq!(
            steps,
            vec![
                Step::Press("q".into()),
                Step::Press("w".into()),
                Step::Release("q".into()),
                Step::Rest,
                Step::OctaveUp,
                Step::Press(",".into()),
                Step::Release(",".into()),
                Step::OctaveDown,
            ]
        );
    }

    fn constant_bank(seconds: f64, sample_rate: u32) -> Arc<SampleBank> {
        let buffer = Arc::new(pianokeys_core::dsp::sampler::SampleBuffer::new(
            vec![0.5; (seconds * sample_rate as f64) as usize],
            sample_rate,
        ));
        let buffers = ["C3", "D3"]
            .into_iter()
            .map(|p| (p.parse().unwrap(), buffer.clone()))
            .collect();
        Arc::new(SampleBank::new("test", buffers))
    }

    #[test]
    fn take_covers_steps_and_tail() {
        let config = PianoConfig::from_json_str(r#"{ "sample_rate": 1000 }"#).unwrap();
        let take = Take {
            steps: parse_sequence("q+ w+ q- _ w-").unwrap(),
            step_seconds: 0.1,
            tail_seconds: 0.5,
            sustain: false,
            soften: false,
        };
        let captured = render_take(&config, constant_bank(5.0, 1000), &take).unwrap();
        assert_eq!(captured.len(), 1000);
        assert!(captured[50] > 0.1, "First note should be audible");
        assert!(captured[999].abs() < 0.01, "Released notes fade out within the tail");
    }

    #[test]
    fn missing_samples_do_not_abort_take() {
        let config = PianoConfig::from_json_str(r#"{ "sample_rate": 1000 }"#).unwrap();
        let take = Take {
            steps: parse_sequence("e+ e- q+").unwrap(),
            step_seconds: 0.1,
            tail_seconds: 0.0,
            sustain: false,
            soften: false,
        };
        let captured = render_take(&config, constant_bank(1.0, 1000), &take).unwrap();
        assert_eq!(captured.len(), 300);
    }

    #[test]
    fn rejects_bare_tokens() {
        assert!(parse_sequence("q").is_err());
        assert!(parse_sequence("+").is_err());
        assert!(parse_sequence("").unwrap().is_empty());
    }
}
