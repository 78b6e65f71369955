use std::process::Stdio;
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt as _, AsyncReadExt as _, AsyncWriteExt as _, BufReader};
use tokio::sync::mpsc;

use crate::openai;

pub const DEFAULT_VOICE: &str = "en-US-AriaNeural";
pub const DEFAULT_TTS_COMMAND: &str = "edge-tts";

/// One item of a synthesis stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechEvent {
    /// Encoded audio to append to the segment file.
    Audio(Vec<u8>),
    /// A spoken word was reached. Only used for progress.
    WordBoundary,
}

pub type SpeechStream = mpsc::Receiver<anyhow::Result<SpeechEvent>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisSettings {
    pub voice: String,
    /// Signed percentage adjustment of the speaking rate.
    pub rate: i32,
    /// Signed percentage adjustment of the volume.
    pub volume: i32,
}

impl Default for SynthesisSettings {
    fn default() -> Self {
        Self {
            voice: DEFAULT_VOICE.to_string(),
            rate: 0,
            volume: 0,
        }
    }
}

impl SynthesisSettings {
    pub fn rate_arg(&self) -> String {
        signed_percent(self.rate)
    }

    pub fn volume_arg(&self) -> String {
        signed_percent(self.volume)
    }

    /// Replaces `{voice}`, `{rate}` and `{volume}` in a command argument.
    pub fn substitute(&self, arg: &str) -> String {
        arg.replace("{voice}", &self.voice)
            .replace("{rate}", &self.rate_arg())
            .replace("{volume}", &self.volume_arg())
    }
}

/// `+10%`, `-5%`, `+0%`.
pub fn signed_percent(value: i32) -> String {
    format!("{value:+}%")
}

/// A streaming text-to-speech service.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Starts synthesizing `text`. Dropping the returned stream abandons the
    /// request.
    async fn stream(
        &self,
        text: &str,
        settings: &SynthesisSettings,
    ) -> anyhow::Result<SpeechStream>;
}

/// Where a speech command reports the words it has spoken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BoundarySource {
    /// The command reports nothing; progress moves per finished segment.
    #[default]
    None,
    /// SRT or WebVTT cues on stderr. Each word of a cue's text is one
    /// boundary.
    StderrSubtitles,
}

/// Runs an external program per request: text on stdin, audio on stdout.
#[derive(Debug, Clone)]
pub struct CommandSynthesizer {
    pub program: String,
    pub args: Vec<String>,
    pub boundaries: BoundarySource,
}

impl CommandSynthesizer {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            boundaries: BoundarySource::None,
        }
    }

    pub fn with_boundaries(mut self, boundaries: BoundarySource) -> Self {
        self.boundaries = boundaries;
        self
    }

    /// `edge-tts` reading text from stdin, writing MP3 to stdout and its
    /// subtitle cues to stderr.
    pub fn edge_tts() -> Self {
        let args = [
            "--voice",
            "{voice}",
            "--rate={rate}",
            "--volume={volume}",
            "--file",
            "-",
            "--write-subtitles",
            "-",
        ]
        .into_iter()
        .map(str::to_string)
        .collect();
        Self::new(DEFAULT_TTS_COMMAND, args).with_boundaries(BoundarySource::StderrSubtitles)
    }
}

/// Spoken words on one line of SRT/WebVTT output. Headers, cue numbers,
/// timings and blank lines count as none.
fn cue_words(line: &str) -> usize {
    let line = line.trim();
    let is_markup = line.is_empty()
        || line.starts_with("WEBVTT")
        || line.contains("-->")
        || line.chars().all(|c| c.is_ascii_digit());
    if is_markup {
        0
    } else {
        line.split_whitespace().count()
    }
}

#[async_trait]
impl SpeechSynthesizer for CommandSynthesizer {
    async fn stream(
        &self,
        text: &str,
        settings: &SynthesisSettings,
    ) -> anyhow::Result<SpeechStream> {
        let args = self
            .args
            .iter()
            .map(|arg| settings.substitute(arg))
            .collect::<Vec<_>>();
        tracing::debug!(command = %self.program, ?args, chars = text.chars().count(), "spawn speech command");

        let mut child = tokio::process::Command::new(&self.program)
            .args(&args)
            .env("AUDIOLIVRE_TTS_VOICE", &settings.voice)
            .env("AUDIOLIVRE_TTS_RATE", settings.rate_arg())
            .env("AUDIOLIVRE_TTS_VOLUME", settings.volume_arg())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("spawn speech command: {}", self.program))?;

        let mut stdin = child.stdin.take().context("open speech command stdin")?;
        let mut stdout = child.stdout.take().context("open speech command stdout")?;
        let mut stderr = child.stderr.take().context("open speech command stderr")?;

        let (tx, rx) = mpsc::channel(16);
        let text = text.to_owned();
        let program = self.program.clone();
        let boundaries = self.boundaries;

        tokio::spawn(async move {
            let feed = async move {
                stdin
                    .write_all(text.as_bytes())
                    .await
                    .context("write speech command stdin")?;
                stdin.shutdown().await.context("close speech command stdin")
            };
            // stderr is always drained to EOF, also after the receiver is gone.
            let diagnostics = {
                let tx = tx.clone();
                async move {
                    let mut reader = BufReader::new(stderr);
                    let mut collected = String::new();
                    let mut line = Vec::new();
                    loop {
                        line.clear();
                        match reader.read_until(b'\n', &mut line).await {
                            Ok(0) | Err(_) => break,
                            Ok(_) => {}
                        }
                        let text = String::from_utf8_lossy(&line);
                        if boundaries == BoundarySource::StderrSubtitles {
                            for _ in 0..cue_words(&text) {
                                let _ = tx.send(Ok(SpeechEvent::WordBoundary)).await;
                            }
                        }
                        collected.push_str(&text);
                    }
                    collected
                }
            };
            let pump = {
                let tx = tx.clone();
                async move {
                    let mut buf = vec![0u8; 16 * 1024];
                    loop {
                        let n = stdout
                            .read(&mut buf)
                            .await
                            .context("read speech command stdout")?;
                        if n == 0 {
                            return anyhow::Ok(true);
                        }
                        if tx.send(Ok(SpeechEvent::Audio(buf[..n].to_vec()))).await.is_err() {
                            return Ok(false);
                        }
                    }
                }
            };

            let (fed, diagnostics, pumped) = tokio::join!(feed, diagnostics, pump);
            let result = match pumped {
                Ok(false) => return,
                Err(err) => Err(err),
                // A failing exit status explains a broken stdin pipe better
                // than the write error does.
                Ok(true) => match child.wait().await {
                    Ok(status) if !status.success() => Err(anyhow::anyhow!(
                        "speech command failed: {program} ({status}): {}",
                        diagnostics.trim()
                    )),
                    Ok(_) => fed,
                    Err(err) => Err(anyhow::Error::new(err).context("wait speech command")),
                },
            };
            if let Err(err) = result {
                let _ = tx.send(Err(err)).await;
            }
        });

        Ok(rx)
    }
}

/// OpenAI `audio/speech`. No word boundaries are reported.
#[derive(Debug, Clone)]
pub struct OpenAiSpeech {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl OpenAiSpeech {
    pub fn new(base_url: &str, api_key: String, model: String) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            endpoint: openai::speech_endpoint(base_url),
            api_key,
            model,
        })
    }

    pub fn from_env(base_url: &str, model: String) -> anyhow::Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY is not set"))?;
        Self::new(base_url, api_key, model)
    }
}

/// Maps a percentage rate adjustment onto OpenAI's `speed` multiplier.
pub fn openai_speed(rate: i32) -> f32 {
    (1.0 + rate as f32 / 100.0).clamp(0.25, 4.0)
}

#[async_trait]
impl SpeechSynthesizer for OpenAiSpeech {
    async fn stream(
        &self,
        text: &str,
        settings: &SynthesisSettings,
    ) -> anyhow::Result<SpeechStream> {
        if settings.volume != 0 {
            tracing::debug!(
                volume = settings.volume,
                "volume adjustment is not supported by OpenAI speech; ignoring"
            );
        }

        let mut response = openai::speech_response(
            &self.client,
            &self.endpoint,
            &self.api_key,
            &self.model,
            &settings.voice,
            text,
            openai_speed(settings.rate),
        )
        .await?;

        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            loop {
                let event = match response.chunk().await {
                    Ok(Some(chunk)) => Ok(SpeechEvent::Audio(chunk.to_vec())),
                    Ok(None) => return,
                    Err(err) => Err(anyhow::Error::new(err).context("read OpenAI speech body")),
                };
                let failed = event.is_err();
                if tx.send(event).await.is_err() || failed {
                    return;
                }
            }
        });
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentages_are_signed() {
        assert_eq!(signed_percent(0), "+0%");
        assert_eq!(signed_percent(25), "+25%");
        assert_eq!(signed_percent(-10), "-10%");
    }

    #[test]
    fn placeholders_are_substituted() {
        let settings = SynthesisSettings {
            voice: "fr-FR-DeniseNeural".to_string(),
            rate: -20,
            volume: 5,
        };
        assert_eq!(
            settings.substitute("--rate={rate} --volume={volume} -v {voice}"),
            "--rate=-20% --volume=+5% -v fr-FR-DeniseNeural"
        );
    }

    #[test]
    fn openai_speed_is_clamped() {
        assert_eq!(openai_speed(0), 1.0);
        assert_eq!(openai_speed(50), 1.5);
        assert_eq!(openai_speed(-90), 0.25);
        assert_eq!(openai_speed(1000), 4.0);
    }

    #[test]
    fn cue_words_skips_subtitle_markup() {
        assert_eq!(cue_words("WEBVTT\n"), 0);
        assert_eq!(cue_words("12"), 0);
        assert_eq!(cue_words("00:00:00,100 --> 00:00:01,250"), 0);
        assert_eq!(cue_words("   "), 0);
        assert_eq!(cue_words("Il était une fois\r\n"), 4);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn subtitle_cues_on_stderr_become_word_boundaries() -> anyhow::Result<()> {
        let script = concat!(
            "cat >/dev/null; ",
            "printf 'WEBVTT\\n\\n00:00:00.100 --> 00:00:00.900\\nbonjour tout le monde\\n\\n' >&2; ",
            "printf 'mp3'; ",
            "printf '2\\n00:00:01,000 --> 00:00:01,400\\nencore\\n' >&2",
        );
        let command = |boundaries| {
            CommandSynthesizer::new("sh", vec!["-c".to_string(), script.to_string()])
                .with_boundaries(boundaries)
        };
        let settings = SynthesisSettings::default();

        for (boundaries, expected) in [
            (BoundarySource::StderrSubtitles, 5),
            (BoundarySource::None, 0),
        ] {
            let mut rx = command(boundaries).stream("texte", &settings).await?;
            let mut words = 0;
            let mut audio = Vec::new();
            while let Some(event) = rx.recv().await {
                match event? {
                    SpeechEvent::Audio(bytes) => audio.extend(bytes),
                    SpeechEvent::WordBoundary => words += 1,
                }
            }
            assert_eq!(words, expected, "{boundaries:?}");
            assert_eq!(audio, b"mp3");
        }
        Ok(())
    }

    #[test]
    fn edge_tts_writes_subtitles_to_stderr() {
        let synth = CommandSynthesizer::edge_tts();
        assert_eq!(synth.boundaries, BoundarySource::StderrSubtitles);
        assert!(synth.args.ends_with(&["--write-subtitles".to_string(), "-".to_string()]));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_synthesizer_streams_stdout_and_reports_failures() -> anyhow::Result<()> {
        let synth = CommandSynthesizer::new(
            "sh",
            vec!["-c".to_string(), "cat; printf '|{voice}'".to_string()],
        );
        let settings = SynthesisSettings::default();
        let mut rx = synth.stream("hello", &settings).await?;
        let mut audio = Vec::new();
        while let Some(event) = rx.recv().await {
            if let SpeechEvent::Audio(bytes) = event? {
                audio.extend(bytes);
            }
        }
        assert_eq!(String::from_utf8(audio)?, "hello|en-US-AriaNeural");

        let failing = CommandSynthesizer::new(
            "sh",
            vec!["-c".to_string(), "cat >/dev/null; echo boom >&2; exit 3".to_string()],
        );
        let mut rx = failing.stream("hello", &settings).await?;
        let mut last = None;
        while let Some(event) = rx.recv().await {
            last = Some(event);
        }
        let err = match last {
            Some(Err(err)) => err,
            other => panic!("expected failure, got {other:?}"),
        };
        assert!(format!("{err:#}").contains("boom"));
        Ok(())
    }
}
