//! Listen command: wires config, decoder pool, audio source and the stdin
//! control channel into a running session.

use crate::audio::vad::VadConfig;
use crate::audio::{AudioSource, FileAudioSource};
use crate::cli::ListenArgs;
use crate::config::{Config, EngineSection};
use crate::control::{self, ControlCommand};
use crate::decoder::DecoderPool;
use crate::defaults;
use crate::engine::energy::{EnergyEngine, EnergyEngineConfig, TranscriberLoader};
use crate::engine::{DecoderEngine, EngineFactory};
use crate::error::{AsrError, Result};
use crate::events::SessionEvent;
use crate::output::{OutputStyle, is_status, render_event, render_reply};
use crate::session::RecognitionSession;
use crate::stt::{Transcriber, WhisperConfig, WhisperTranscriber};
use crate::sync::lock;
use crossbeam_channel::{Receiver, never, select, unbounded};
use std::collections::HashMap;
use std::io::{BufRead, IsTerminal};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How often the control loop checks whether a file session has finished.
const IDLE_TICK: Duration = Duration::from_millis(100);

/// Apply command-line overrides on top of the loaded configuration.
pub fn apply_overrides(mut config: Config, args: &ListenArgs) -> Config {
    if let Some(device) = &args.device {
        config.audio.device = Some(device.clone());
    }
    if let Some(mode) = args.mode {
        config.session.mode = mode;
    }
    if let Some(decoders) = args.decoders {
        config.decoder.count = usize::from(decoders);
    }
    config
}

/// Loads a whisper model once per path and shares it between slots.
pub fn transcriber_loader(engine: &EngineSection) -> TranscriberLoader {
    let language = engine.language.clone();
    let threads = engine.threads;
    cached_loader(move |path: &Path| -> Result<Arc<dyn Transcriber>> {
        let config = WhisperConfig {
            model_path: path.to_path_buf(),
            language: language.clone(),
            threads,
        };
        Ok(Arc::new(WhisperTranscriber::new(config)?))
    })
}

/// Wrap `load` so each model path is loaded at most once. Failures are
/// not cached.
pub fn cached_loader(
    load: impl Fn(&Path) -> Result<Arc<dyn Transcriber>> + Send + Sync + 'static,
) -> TranscriberLoader {
    let cache: Mutex<HashMap<PathBuf, Arc<dyn Transcriber>>> = Mutex::new(HashMap::new());
    Arc::new(move |path: &Path| -> Result<Arc<dyn Transcriber>> {
        // Held across the load so two slots never load the same model twice.
        let mut cache = lock(&cache);
        if let Some(transcriber) = cache.get(path) {
            return Ok(Arc::clone(transcriber));
        }
        let transcriber = load(path)?;
        info!(model = %path.display(), "transcriber loaded");
        cache.insert(path.to_path_buf(), Arc::clone(&transcriber));
        Ok(transcriber)
    })
}

/// Factory for the energy engines that fill the pool.
pub fn engine_factory(config: &Config) -> impl EngineFactory + use<> {
    let engine_config = EnergyEngineConfig {
        vad: VadConfig {
            speech_threshold: config.engine.vad_threshold,
            hangover_ms: config.engine.silence_duration_ms,
            min_speech_ms: config.engine.min_speech_ms,
        },
        sample_rate: config.audio.sample_rate,
        max_utterance_samples: defaults::MAX_UTTERANCE_SAMPLES,
    };
    let loader = transcriber_loader(&config.engine);
    move |_: usize| -> Box<dyn DecoderEngine> {
        Box::new(EnergyEngine::new(engine_config, Arc::clone(&loader)))
    }
}

fn build_source(config: &Config, file: Option<&Path>) -> Result<Box<dyn AudioSource>> {
    if let Some(path) = file {
        return Ok(Box::new(FileAudioSource::new(path)));
    }
    #[cfg(feature = "cpal-audio")]
    {
        Ok(Box::new(crate::audio::capture::CpalAudioSource::new(
            config.audio.device.clone(),
        )))
    }
    #[cfg(not(feature = "cpal-audio"))]
    {
        Err(AsrError::AudioDeviceNotFound {
            device: format!(
                "{} (built without the cpal-audio feature, use --file)",
                config
                    .audio
                    .device
                    .as_deref()
                    .unwrap_or(defaults::DEVICE)
            ),
        })
    }
}

/// Queue the configured searches on every slot and apply them.
pub fn queue_initial_searches(session: &RecognitionSession, config: &Config) -> Result<()> {
    if let Some(grammar) = &config.decoder.grammar {
        session.set_grammar_file(grammar);
    }
    if let Some(language_model) = &config.decoder.language_model {
        session.set_language_model(language_model);
    }
    session.set_search_mode(config.decoder.search_mode);
    session.apply_updates()
}

pub fn build_session(config: &Config, args: &ListenArgs) -> Result<RecognitionSession> {
    build_session_with(config, args, &engine_factory(config))
}

/// [`build_session`] with the decoders made by `factory`.
pub fn build_session_with(
    config: &Config,
    args: &ListenArgs,
    factory: &dyn EngineFactory,
) -> Result<RecognitionSession> {
    let pool = DecoderPool::new(config.decoder.count, &config.model_paths(), factory);
    if pool.healthy_count() == 0 {
        return Err(AsrError::NoHealthySlot);
    }
    info!(
        decoders = pool.len(),
        healthy = pool.healthy_count(),
        "decoder pool ready"
    );
    let source = build_source(config, args.file.as_deref())?;
    Ok(RecognitionSession::new(
        pool,
        source,
        config.session_config(),
    ))
}

/// Forward stdin lines to a channel so they can be selected on.
fn spawn_stdin_reader() -> Receiver<String> {
    let (tx, rx) = unbounded();
    let spawned = thread::Builder::new()
        .name("stdin-control".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "stdin read failed");
                        break;
                    }
                }
            }
        });
    if let Err(e) = spawned {
        warn!(error = %e, "could not start stdin reader, control commands disabled");
    }
    rx
}

fn print_event(event: &SessionEvent, style: OutputStyle, quiet: bool) {
    let line = render_event(event, style);
    match (style, is_status(event)) {
        (OutputStyle::Json, _) | (_, false) => println!("{}", line),
        (_, true) if !quiet => eprintln!("{}", line),
        _ => {}
    }
}

/// Run the listen command until `quit`, stdin EOF on a live device, or the
/// end of an input file.
pub fn run_listen(config: Config, args: ListenArgs, quiet: bool) -> Result<()> {
    let config = apply_overrides(config, &args);
    config.validate()?;

    let session = build_session(&config, &args)?;
    queue_initial_searches(&session, &config)?;
    if let Some(path) = &args.record {
        session.record_to(path)?;
    }

    let style = if args.json {
        OutputStyle::Json
    } else {
        OutputStyle::Text {
            color: std::io::stderr().is_terminal(),
        }
    };
    let events = session.subscribe_all();
    let from_file = args.file.is_some();
    let mut lines = spawn_stdin_reader();

    session.start_listening()?;

    loop {
        select! {
            recv(events.receiver) -> event => {
                if let Ok(event) = event {
                    print_event(&event, style, quiet);
                }
            }
            recv(lines) -> line => match line {
                Ok(line) => match control::parse_line(&line) {
                    Ok(Some(ControlCommand::Quit)) => break,
                    Ok(Some(command)) => {
                        let reply = control::execute(&session, &command);
                        eprintln!("{}", render_reply(&reply, style));
                    }
                    Ok(None) => {}
                    Err(e) => eprintln!("{}", render_reply(
                        &control::Reply::Error { message: e.to_string() },
                        style,
                    )),
                },
                Err(_) => {
                    debug!("control input closed");
                    if !from_file {
                        break;
                    }
                    lines = never();
                }
            },
            default(IDLE_TICK) => {
                if from_file && !session.is_listening() {
                    break;
                }
            }
        }
    }

    session.shutdown();
    for event in events.receiver.try_iter() {
        print_event(&event, style, quiet);
    }
    if let Some(error) = session.last_error() {
        warn!(error = %error, "session ended with an error");
    }
    debug!(stats = ?session.stats(), "session finished");
    Ok(())
}

/// Print input device names, one per line.
pub fn list_audio_devices() -> Result<()> {
    #[cfg(feature = "cpal-audio")]
    {
        for name in crate::audio::capture::list_devices()? {
            println!("{}", name);
        }
        Ok(())
    }
    #[cfg(not(feature = "cpal-audio"))]
    {
        Err(AsrError::AudioCapture {
            message: "built without the cpal-audio feature".to_string(),
        })
    }
}
