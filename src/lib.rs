#![forbid(unsafe_code)]

pub mod assemble;
pub mod chunk;
pub mod cli;
pub mod convert;
pub mod epub;
pub mod epub_reader;
pub mod error;
pub mod extract;
pub mod formats;
pub mod logging;
pub mod markup;
pub mod openai;
pub mod progress;
pub mod session;
pub mod synth;
pub mod translate;
pub mod translator;
pub mod tts;
