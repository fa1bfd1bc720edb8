//! Sample banks — loading an instrument's samples into playable buffers.
//!
//! A sample source answers "give me instrument X" with a map from pitch name
//! (the sample's filename without extension, e.g. "C4") to base64-encoded
//! audio bytes, or with an error reason. The loader decodes the response into
//! a [`SampleBank`] and tracks a load state per instrument.
//!
//! Loads take `&self` so requests for different instruments can be in flight
//! together. When the same instrument is requested again before an earlier
//! request finishes, the latest request owns the state and the earlier result
//! is discarded.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::io::Cursor;
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::dsp::sampler::SampleBuffer;
use crate::error::LoadError;
use crate::keymap::Pitch;

/// Pitch name → base64 audio bytes, as returned by a sample source.
pub type EncodedSamples = BTreeMap<String, String>;

// ── Sample Bank ─────────────────────────────────────────────

/// Decoded buffers for one instrument, keyed by pitch.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBank {
    instrument: String,
    buffers: HashMap<Pitch, Arc<SampleBuffer>>,
}

impl SampleBank {
    pub fn new(instrument: impl Into<String>, buffers: HashMap<Pitch, Arc<SampleBuffer>>) -> Self {
        SampleBank {
            instrument: instrument.into(),
            buffers,
        }
    }

    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    pub fn get(&self, pitch: Pitch) -> Option<&Arc<SampleBuffer>> {
        self.buffers.get(&pitch)
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Pitches with a buffer, lowest first.
    pub fn pitches(&self) -> Vec<Pitch> {
        let mut pitches: Vec<Pitch> = self.buffers.keys().copied().collect();
        pitches.sort_by_key(Pitch::midi_note);
        pitches
    }
}

/// Lifecycle of one instrument's bank.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum LoadState {
    #[default]
    Unloaded,
    Loading,
    Ready(Arc<SampleBank>),
    Failed(String),
}

// ── Wire Format ─────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(untagged)]
enum SampleResponse {
    Failure { error: String },
    Samples(EncodedSamples),
}

/// Parse a sample server response body.
pub fn parse_response(body: &str) -> Result<EncodedSamples, LoadError> {
    match serde_json::from_str(body)? {
        SampleResponse::Failure { error } => Err(LoadError::Remote(error)),
        SampleResponse::Samples(samples) => Ok(samples),
    }
}

/// Decode every sample in a response into a bank.
///
/// Entries whose name is not a pitch are skipped; a sample that fails to
/// decode fails the whole bank.
pub fn decode_samples(instrument: &str, encoded: &EncodedSamples) -> Result<SampleBank, LoadError> {
    let mut buffers = HashMap::with_capacity(encoded.len());
    for (name, data) in encoded {
        let pitch: Pitch = match name.parse() {
            Ok(p) => p,
            Err(_) => {
                warn!(instrument, name = name.as_str(), "Skipping sample with non-pitch name");
                continue;
            }
        };

        let bytes = STANDARD.decode(data.trim()).map_err(|source| LoadError::Base64 {
            pitch: name.clone(),
            source,
        })?;
        let buffer = decode_audio(name, &bytes)?;
        debug!(instrument, %pitch, samples = buffer.len(), "Sample decoded");
        buffers.insert(pitch, Arc::new(buffer));
    }
    Ok(SampleBank::new(instrument, buffers))
}

/// Decode WAV (by `RIFF` header) or MP3 bytes into a mono buffer.
///
/// MP3 needs the `mp3` feature; without it anything that is not WAV fails
/// to decode.
pub fn decode_audio(name: &str, bytes: &[u8]) -> Result<SampleBuffer, LoadError> {
    if bytes.starts_with(b"RIFF") {
        decode_wav(name, bytes)
    } else {
        decode_mp3(name, bytes)
    }
}

fn decode_error(name: &str, reason: impl ToString) -> LoadError {
    LoadError::Decode {
        pitch: name.to_string(),
        reason: reason.to_string(),
    }
}

fn decode_wav(name: &str, bytes: &[u8]) -> Result<SampleBuffer, LoadError> {
    let mut reader = hound::WavReader::new(Cursor::new(bytes)).map_err(|e| decode_error(name, e))?;
    let spec = reader.spec();
    let channels = spec.channels as usize;

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(|e| decode_error(name, e))?,
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()
                .map_err(|e| decode_error(name, e))?
        }
    };

    Ok(SampleBuffer::from_interleaved_f32(&samples, channels, spec.sample_rate))
}

#[cfg(not(feature = "mp3"))]
fn decode_mp3(name: &str, _bytes: &[u8]) -> Result<SampleBuffer, LoadError> {
    Err(decode_error(name, "mp3 support disabled"))
}

#[cfg(feature = "mp3")]
fn decode_mp3(name: &str, bytes: &[u8]) -> Result<SampleBuffer, LoadError> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(bytes));
    let mut pcm: Vec<i16> = Vec::new();
    let mut sample_rate = 0;
    let mut channels = 1;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                sample_rate = frame.sample_rate;
                channels = frame.channels;
                pcm.extend_from_slice(&frame.data);
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(decode_error(name, e)),
        }
    }

    if pcm.is_empty() || sample_rate <= 0 {
        return Err(decode_error(name, "no audio frames"));
    }
    Ok(SampleBuffer::from_interleaved_i16(&pcm, channels, sample_rate as u32))
}

// ── Sources ─────────────────────────────────────────────────

/// Where instrument samples come from.
pub trait SampleSource {
    /// Fetch every sample of `instrument`, still base64-encoded.
    fn fetch(&self, instrument: &str) -> impl Future<Output = Result<EncodedSamples, LoadError>>;

    /// Names of the instruments this source can serve.
    fn instrument_names(&self) -> impl Future<Output = Result<Vec<String>, LoadError>>;
}

#[cfg(feature = "native")]
pub use directory::DirectorySampleSource;

#[cfg(feature = "native")]
mod directory {
    use std::path::{Path, PathBuf};

    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use tracing::debug;

    use super::{EncodedSamples, SampleSource};
    use crate::error::LoadError;

    const AUDIO_EXTENSIONS: [&str; 2] = ["mp3", "wav"];

    /// Serves instruments from a directory: one subdirectory per instrument,
    /// one audio file per pitch (`piano/C4.mp3`).
    #[derive(Debug, Clone)]
    pub struct DirectorySampleSource {
        root: PathBuf,
    }

    impl DirectorySampleSource {
        pub fn new(root: impl Into<PathBuf>) -> Self {
            DirectorySampleSource { root: root.into() }
        }

        pub fn root(&self) -> &Path {
            &self.root
        }

        fn instrument_dir(&self, instrument: &str) -> Result<PathBuf, LoadError> {
            let plain = !instrument.is_empty()
                && !instrument.contains(['/', '\\'])
                && instrument != "."
                && instrument != "..";
            if !plain {
                return Err(LoadError::Remote(format!("Invalid instrument name '{instrument}'")));
            }
            Ok(self.root.join(instrument))
        }
    }

    fn is_audio_file(path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| AUDIO_EXTENSIONS.iter().any(|a| e.eq_ignore_ascii_case(a)))
    }

    impl SampleSource for DirectorySampleSource {
        async fn fetch(&self, instrument: &str) -> Result<EncodedSamples, LoadError> {
            let dir = self.instrument_dir(instrument)?;
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(LoadError::Remote(format!("Instrument '{instrument}' not found")));
                }
                Err(e) => return Err(e.into()),
            };

            let mut samples = EncodedSamples::new();
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if !is_audio_file(&path) {
                    continue;
                }
                let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                let bytes = tokio::fs::read(&path).await?;
                debug!(path = ?path, bytes = bytes.len(), "Read sample file");
                samples.insert(stem.to_string(), STANDARD.encode(bytes));
            }
            Ok(samples)
        }

        async fn instrument_names(&self) -> Result<Vec<String>, LoadError> {
            let mut entries = tokio::fs::read_dir(&self.root).await?;
            let mut names = Vec::new();
            while let Some(entry) = entries.next_entry().await? {
                if entry.file_type().await?.is_dir() {
                    if let Some(name) = entry.file_name().to_str() {
                        names.push(name.to_string());
                    }
                }
            }
            names.sort();
            Ok(names)
        }
    }
}

#[cfg(feature = "remote")]
pub use remote::HttpSampleSource;

#[cfg(feature = "remote")]
mod remote {
    use super::{EncodedSamples, SampleSource, parse_response};
    use crate::error::LoadError;

    /// Client for a sample server exposing `/audio?instrument=` and `/instruments`.
    #[derive(Debug, Clone)]
    pub struct HttpSampleSource {
        base_url: String,
        client: reqwest::Client,
    }

    impl HttpSampleSource {
        pub fn new(base_url: impl Into<String>) -> Self {
            HttpSampleSource {
                base_url: base_url.into().trim_end_matches('/').to_string(),
                client: reqwest::Client::new(),
            }
        }
    }

    fn fetch_error(e: reqwest::Error) -> LoadError {
        LoadError::Fetch(e.to_string())
    }

    impl SampleSource for HttpSampleSource {
        async fn fetch(&self, instrument: &str) -> Result<EncodedSamples, LoadError> {
            let body = self
                .client
                .get(format!("{}/audio", self.base_url))
                .query(&[("instrument", instrument)])
                .send()
                .await
                .map_err(fetch_error)?
                .text()
                .await
                .map_err(fetch_error)?;
            parse_response(&body)
        }

        async fn instrument_names(&self) -> Result<Vec<String>, LoadError> {
            self.client
                .get(format!("{}/instruments", self.base_url))
                .send()
                .await
                .map_err(fetch_error)?
                .error_for_status()
                .map_err(fetch_error)?
                .json::<Vec<String>>()
                .await
                .map_err(fetch_error)
        }
    }
}

// ── Loader ──────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Entry {
    request: u64,
    state: LoadState,
}

/// Loads instrument banks from a source and tracks their state.
pub struct SampleBankLoader<S: SampleSource> {
    source: S,
    entries: RefCell<HashMap<String, Entry>>,
    next_request: Cell<u64>,
}

impl<S: SampleSource> SampleBankLoader<S> {
    pub fn new(source: S) -> Self {
        SampleBankLoader {
            source,
            entries: RefCell::new(HashMap::new()),
            next_request: Cell::new(1),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Current state of `instrument`.
    pub fn state(&self, instrument: &str) -> LoadState {
        self.entries
            .borrow()
            .get(instrument)
            .map(|e| e.state.clone())
            .unwrap_or_default()
    }

    /// The ready bank for `instrument`, if any.
    pub fn bank(&self, instrument: &str) -> Option<Arc<SampleBank>> {
        match self.state(instrument) {
            LoadState::Ready(bank) => Some(bank),
            _ => None,
        }
    }

    /// Names of the instruments the source offers.
    pub async fn instrument_names(&self) -> Result<Vec<String>, LoadError> {
        self.source.instrument_names().await
    }

    /// Fetch and decode `instrument`.
    ///
    /// Returns [`LoadError::Superseded`] if a newer load of the same
    /// instrument started while this one was in flight; that newer load
    /// decides the state.
    pub async fn load(&self, instrument: &str) -> Result<Arc<SampleBank>, LoadError> {
        let request = self.next_request.get();
        self.next_request.set(request + 1);
        self.entries.borrow_mut().insert(
            instrument.to_string(),
            Entry {
                request,
                state: LoadState::Loading,
            },
        );
        info!(instrument, request, "Loading sample bank");

        let result = match self.source.fetch(instrument).await {
            Ok(encoded) => decode_samples(instrument, &encoded).map(Arc::new),
            Err(e) => Err(e),
        };

        let mut entries = self.entries.borrow_mut();
        let entry = entries.entry(instrument.to_string()).or_default();
        if entry.request != request {
            warn!(instrument, request, latest = entry.request, "Sample bank load superseded");
            return Err(LoadError::Superseded);
        }

        match result {
            Ok(bank) => {
                info!(instrument, samples = bank.len(), "Sample bank ready");
                entry.state = LoadState::Ready(bank.clone());
                Ok(bank)
            }
            Err(e) => {
                warn!(instrument, error = %e, "Sample bank load failed");
                entry.state = LoadState::Failed(e.reason());
                Err(e)
            }
        }
    }
}
