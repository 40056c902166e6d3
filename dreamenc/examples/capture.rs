// SPDX-FileCopyrightText: 2025 Contributors to the dreamsource project.
// SPDX-License-Identifier: Apache-2.0

//! Captures one encoder stream to a file (or stdout).
//!
//! ```bash
//! cargo run --example capture -- --kind video --bitrate 4000 --duration 30 -o out.h264
//! cargo run --example capture -- --config audio.json -o - > out.aac
//! ```

mod common;

use std::{
    fs::File,
    io::{self, Write},
    path::PathBuf,
    time::{Duration, Instant},
};

use clap::{Parser, ValueEnum};
use dreamenc::{EncoderStream, Error, InputMode, StreamConfig, StreamKind};
use tracing::info;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Kind {
    Audio,
    Video,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Input {
    Live,
    HdmiIn,
    Background,
}

#[derive(Parser, Debug)]
#[command(version, about = "Capture the elementary stream of a Dreambox hardware encoder")]
struct Args {
    /// Which encoder to capture from
    #[arg(long, value_enum, default_value = "video")]
    kind: Kind,

    /// JSON stream configuration; the flags below override it
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Encoder index (/dev/aencN, /dev/vencN)
    #[arg(long)]
    device: Option<u32>,

    /// Bitrate in kbit/s
    #[arg(long)]
    bitrate: Option<u32>,

    /// Encoder input source
    #[arg(long, value_enum)]
    input: Option<Input>,

    /// Capture duration in seconds
    #[arg(long, default_value_t = 10)]
    duration: u64,

    /// Output file, `-` for stdout
    #[arg(short, long)]
    output: PathBuf,
}

fn build_config(args: &Args) -> Result<StreamConfig, Error> {
    let mut config = match &args.config {
        Some(path) => StreamConfig::from_json(&std::fs::read_to_string(path)?)?,
        None => StreamConfig {
            kind: match args.kind {
                Kind::Audio => StreamKind::Audio,
                Kind::Video => StreamKind::Video,
            },
            ..Default::default()
        },
    };
    if let Some(index) = args.device {
        config.device_index = index;
    }
    if let Some(bitrate) = args.bitrate {
        config.bitrate = Some(bitrate);
    }
    if let Some(input) = args.input {
        config.input_mode = Some(match input {
            Input::Live => InputMode::Live,
            Input::HdmiIn => InputMode::HdmiIn,
            Input::Background => InputMode::Background,
        });
    }
    config.validate()?;
    Ok(config)
}

fn main() -> Result<(), Error> {
    common::setup_logging();
    let args = Args::parse();
    let config = build_config(&args)?;
    info!(
        "Capturing {:?} from {} for {} s",
        config.kind,
        config.resolved_device_path().display(),
        args.duration
    );

    let mut output: Box<dyn Write> = if args.output.as_os_str() == "-" {
        Box::new(io::stdout().lock())
    } else {
        Box::new(File::create(&args.output)?)
    };

    let stream = EncoderStream::new(config)?;
    stream.start()?;
    stream.play()?;

    let deadline = Instant::now() + Duration::from_secs(args.duration);
    let (mut frames, mut bytes) = (0u64, 0usize);
    while Instant::now() < deadline {
        match stream.pull() {
            Ok(frame) if frame.is_placeholder() => continue,
            Ok(frame) => {
                output.write_all(frame.data())?;
                frames += 1;
                bytes += frame.len();
            }
            Err(Error::Eos) => {
                info!("Encoder reached end of stream");
                break;
            }
            Err(err) => return Err(err),
        }
    }
    output.flush()?;

    stream.pause()?;
    stream.stop()?;
    info!("Wrote {frames} frames, {bytes} bytes");
    Ok(())
}
