use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::convert::ConvertOptions;
use crate::synth::DEFAULT_PARALLEL;
use crate::translate::TranslateOptions;
use crate::translator::{
    CommandTranslator, DEFAULT_GOOGLE_BASE_URL, GoogleTranslator, OpenAiTranslator, TextTranslator,
};
use crate::tts::{
    BoundarySource, CommandSynthesizer, DEFAULT_TTS_COMMAND, DEFAULT_VOICE, OpenAiSpeech, SpeechSynthesizer,
    SynthesisSettings,
};

const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// Log at debug level (ignored when RUST_LOG is set).
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Convert a document into a chapterized `.m4b` audiobook.
    Convert(ConvertArgs),
    /// Translate an EPUB into another language.
    Translate(TranslateArgs),
    /// Extract chapters and report counts without synthesizing anything.
    Scan(ScanArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SpeechEngine {
    /// External program: text on stdin, audio on stdout.
    Command,
    Openai,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TranslateEngine {
    Google,
    /// External program: text on stdin, translation on stdout.
    Command,
    Openai,
}

#[derive(Debug, Args)]
pub struct ConvertArgs {
    /// Source document (.epub, .pdf, .docx, .txt, .md).
    #[arg(long)]
    pub input: PathBuf,

    /// ffmpeg executable (default: first `ffmpeg` on PATH).
    #[arg(long)]
    pub ffmpeg: Option<PathBuf>,

    /// Voice identifier passed to the speech service.
    #[arg(long, default_value = DEFAULT_VOICE)]
    pub voice: String,

    /// Speaking rate adjustment in percent (e.g. -10, 25).
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    pub rate: i32,

    /// Volume adjustment in percent.
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    pub volume: i32,

    /// Maximum segments synthesized at once.
    #[arg(long, default_value_t = DEFAULT_PARALLEL)]
    pub parallel: usize,

    /// Also copy the numbered MP3 segments to `<base>_MP3s/`.
    #[arg(long)]
    pub keep_segments: bool,

    #[arg(long, value_enum, default_value_t = SpeechEngine::Command)]
    pub engine: SpeechEngine,

    /// Speech program for `--engine command`.
    #[arg(long, default_value = DEFAULT_TTS_COMMAND)]
    pub tts_command: String,

    /// Arguments for the speech program; `{voice}`, `{rate}` and `{volume}`
    /// are substituted. Defaults to edge-tts arguments when empty.
    #[arg(last = true)]
    pub tts_args: Vec<String>,

    /// Count progress from SRT/WebVTT cues the speech program writes to
    /// stderr (on by default for edge-tts).
    #[arg(long)]
    pub subtitle_boundaries: bool,

    #[arg(long, default_value = DEFAULT_OPENAI_BASE_URL)]
    pub openai_base_url: String,

    #[arg(long, default_value = "gpt-4o-mini-tts")]
    pub openai_speech_model: String,
}

impl ConvertArgs {
    pub fn options(&self) -> ConvertOptions {
        ConvertOptions {
            encoder: self.ffmpeg.clone(),
            settings: SynthesisSettings {
                voice: self.voice.clone(),
                rate: self.rate,
                volume: self.volume,
            },
            parallel: self.parallel.max(1),
            keep_segments: self.keep_segments,
        }
    }

    pub fn synthesizer(&self) -> anyhow::Result<Arc<dyn SpeechSynthesizer>> {
        match self.engine {
            SpeechEngine::Command => {
                let synth = if self.tts_args.is_empty() && self.tts_command == DEFAULT_TTS_COMMAND
                {
                    CommandSynthesizer::edge_tts()
                } else {
                    CommandSynthesizer::new(&self.tts_command, self.tts_args.clone())
                };
                let synth = if self.subtitle_boundaries {
                    synth.with_boundaries(BoundarySource::StderrSubtitles)
                } else {
                    synth
                };
                Ok(Arc::new(synth))
            }
            SpeechEngine::Openai => Ok(Arc::new(OpenAiSpeech::from_env(
                &self.openai_base_url,
                self.openai_speech_model.clone(),
            )?)),
        }
    }
}

#[derive(Debug, Args)]
pub struct TranslateArgs {
    /// Source EPUB.
    #[arg(long)]
    pub input: PathBuf,

    /// Target language (e.g. `fr`, `zh-CN`).
    #[arg(long)]
    pub to: String,

    #[arg(long, value_enum, default_value_t = TranslateEngine::Google)]
    pub engine: TranslateEngine,

    #[arg(long, default_value = DEFAULT_GOOGLE_BASE_URL)]
    pub google_base_url: String,

    /// Translator program (required when `--engine command`).
    #[arg(long)]
    pub command: Option<String>,

    /// Arguments for the translator program.
    #[arg(last = true)]
    pub command_args: Vec<String>,

    #[arg(long, default_value = DEFAULT_OPENAI_BASE_URL)]
    pub openai_base_url: String,

    #[arg(long, default_value = "gpt-4.1-mini")]
    pub openai_model: String,

    #[arg(long, default_value_t = 0.2)]
    pub openai_temperature: f32,
}

impl TranslateArgs {
    pub fn options(&self) -> TranslateOptions {
        TranslateOptions::new(&self.to)
    }

    pub fn translator(&self) -> anyhow::Result<Box<dyn TextTranslator>> {
        match self.engine {
            TranslateEngine::Google => Ok(Box::new(GoogleTranslator::new(&self.google_base_url)?)),
            TranslateEngine::Command => {
                let Some(program) = self.command.as_deref() else {
                    anyhow::bail!("missing --command (required when --engine=command)");
                };
                Ok(Box::new(CommandTranslator {
                    program: program.to_string(),
                    args: self.command_args.clone(),
                }))
            }
            TranslateEngine::Openai => Ok(Box::new(OpenAiTranslator::from_env(
                &self.openai_base_url,
                self.openai_model.clone(),
                self.openai_temperature,
            )?)),
        }
    }
}

#[derive(Debug, Args)]
pub struct ScanArgs {
    /// Document to inspect.
    #[arg(long)]
    pub input: PathBuf,

    /// Print a per-chapter JSON report instead of the one-line summary.
    #[arg(long)]
    pub json: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn convert_defaults_and_negative_rates() {
        let cli = Cli::try_parse_from([
            "audiolivre",
            "convert",
            "--input",
            "book.epub",
            "--rate",
            "-15",
            "--",
            "say",
            "{voice}",
        ])
        .unwrap();
        let Command::Convert(args) = cli.command else {
            panic!("expected convert");
        };
        let options = args.options();
        assert_eq!(options.settings.rate, -15);
        assert_eq!(options.settings.voice, DEFAULT_VOICE);
        assert_eq!(options.parallel, 3);
        assert!(!options.keep_segments);
        assert_eq!(args.tts_args, vec!["say", "{voice}"]);
    }

    #[test]
    fn command_engine_requires_a_program() {
        let cli = Cli::try_parse_from([
            "audiolivre",
            "translate",
            "--input",
            "b.epub",
            "--to",
            "fr",
            "--engine",
            "command",
        ])
        .unwrap();
        let Command::Translate(args) = cli.command else {
            panic!("expected translate");
        };
        let err = args.translator().err().map(|e| e.to_string());
        assert_eq!(
            err.as_deref(),
            Some("missing --command (required when --engine=command)")
        );
    }
}
