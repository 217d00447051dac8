//! `svc`: headless front-end for the realtime voice conversion engine.
//!
//! ```text
//! svc devices [--json]
//! svc realtime [session options] [--duration SECS] [--virtual-input WAV]
//! svc convert INPUT OUTPUT [session options]
//! svc preset list | add NAME | delete NAME | apply NAME
//! ```

mod commands;
mod presets;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use svc_core::{ComputeDevice, F0Method, RealtimeAlgorithm, SessionConfig};
use tracing::info;

use crate::commands::VirtualIo;
use crate::presets::{default_presets_path, DEFAULT_PRESET};

#[derive(Parser, Debug)]
#[command(name = "svc")]
#[command(author, version, about = "Realtime singing voice conversion")]
struct Cli {
    /// Presets file (default: $SVC_PRESETS_PATH or the user data directory)
    #[arg(long, global = true)]
    presets: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List audio devices of the default host
    Devices {
        #[arg(long)]
        json: bool,
    },
    /// Convert the input device stream to the output device in real time
    Realtime {
        #[command(flatten)]
        session: SessionArgs,

        /// Stop after this many seconds (default: until Enter is pressed)
        #[arg(long)]
        duration: Option<f64>,

        /// Feed this WAV through in-memory devices instead of the sound card
        #[arg(long)]
        virtual_input: Option<PathBuf>,

        /// Where to write what the in-memory output device received
        #[arg(long, requires = "virtual_input")]
        virtual_output: Option<PathBuf>,
    },
    /// Convert a WAV file
    Convert {
        input: PathBuf,
        output: PathBuf,

        #[command(flatten)]
        session: SessionArgs,
    },
    /// Manage named presets
    Preset {
        #[command(subcommand)]
        action: PresetAction,
    },
}

#[derive(Subcommand, Debug)]
enum PresetAction {
    /// List preset names
    List,
    /// Save the resolved options under NAME (overwrites)
    Add {
        name: String,
        #[command(flatten)]
        session: SessionArgs,
    },
    /// Delete a user preset
    Delete { name: String },
    /// Print the configuration NAME resolves to
    Apply {
        name: String,
        #[command(flatten)]
        session: SessionArgs,
    },
}

/// Session options. Anything given here overrides the preset.
#[derive(Args, Debug, Default)]
struct SessionArgs {
    /// Preset to start from
    #[arg(long, default_value = DEFAULT_PRESET)]
    preset: String,

    /// Session config JSON to start from instead of a preset
    #[arg(long)]
    config_file: Option<PathBuf>,

    /// Model checkpoint (G_*.pth)
    #[arg(short, long)]
    model: Option<PathBuf>,

    /// Model config.json
    #[arg(short = 'c', long)]
    model_config: Option<PathBuf>,

    /// Cluster model (kmeans JSON)
    #[arg(long)]
    cluster_model: Option<PathBuf>,

    #[arg(short, long)]
    speaker: Option<String>,

    /// Pitch shift in semitones
    #[arg(short, long, allow_hyphen_values = true)]
    transpose: Option<i32>,

    /// Let the model predict F0 (disables transpose)
    #[arg(long)]
    auto_predict_f0: Option<bool>,

    /// crepe, crepe-tiny, parselmouth, dio or harvest
    #[arg(long)]
    f0_method: Option<F0Method>,

    #[arg(long)]
    cluster_infer_ratio: Option<f32>,

    #[arg(long)]
    noise_scale: Option<f32>,

    #[arg(long)]
    noise_seed: Option<u64>,

    /// Silence threshold in dB
    #[arg(long, allow_hyphen_values = true)]
    silence_threshold: Option<f32>,

    /// Compare against an absolute level instead of the clip peak (offline)
    #[arg(long)]
    absolute_thresh: Option<bool>,

    #[arg(long)]
    pad_seconds: Option<f32>,

    #[arg(long)]
    chunk_seconds: Option<f32>,

    #[arg(long)]
    crossfade_seconds: Option<f32>,

    #[arg(long)]
    block_seconds: Option<f32>,

    #[arg(long)]
    additional_infer_before_seconds: Option<f32>,

    #[arg(long)]
    additional_infer_after_seconds: Option<f32>,

    /// 1 = constant interval, 2 = speech boundary
    #[arg(long)]
    realtime_algorithm: Option<RealtimeAlgorithm>,

    /// Silence queued before the first output block
    #[arg(long)]
    output_buffer_seconds: Option<f32>,

    #[arg(long)]
    input_device: Option<usize>,

    #[arg(long)]
    output_device: Option<usize>,

    /// Play the input unchanged (bypass inference)
    #[arg(long)]
    passthrough: bool,

    /// cpu, cuda or mps
    #[arg(long)]
    device: Option<ComputeDevice>,
}

impl SessionArgs {
    fn resolve(self, presets_path: &std::path::Path) -> Result<SessionConfig> {
        let base =
            commands::base_config(presets_path, &self.preset, self.config_file.as_deref())?;
        Ok(self.apply(base))
    }

    fn apply(self, mut c: SessionConfig) -> SessionConfig {
        fn set<T>(slot: &mut T, value: Option<T>) {
            if let Some(v) = value {
                *slot = v;
            }
        }
        set(&mut c.model_path, self.model);
        set(&mut c.config_path, self.model_config);
        if self.cluster_model.is_some() {
            c.cluster_model_path = self.cluster_model;
        }
        if self.speaker.is_some() {
            c.speaker = self.speaker;
        }
        set(&mut c.transpose, self.transpose);
        set(&mut c.auto_predict_f0, self.auto_predict_f0);
        set(&mut c.f0_method, self.f0_method);
        set(&mut c.cluster_infer_ratio, self.cluster_infer_ratio);
        set(&mut c.noise_scale, self.noise_scale);
        set(&mut c.noise_seed, self.noise_seed);
        set(&mut c.silence_threshold, self.silence_threshold);
        set(&mut c.absolute_thresh, self.absolute_thresh);
        set(&mut c.pad_seconds, self.pad_seconds);
        set(&mut c.chunk_seconds, self.chunk_seconds);
        set(&mut c.crossfade_seconds, self.crossfade_seconds);
        set(&mut c.block_seconds, self.block_seconds);
        set(
            &mut c.additional_infer_before_seconds,
            self.additional_infer_before_seconds,
        );
        set(
            &mut c.additional_infer_after_seconds,
            self.additional_infer_after_seconds,
        );
        set(&mut c.realtime_algorithm, self.realtime_algorithm);
        set(&mut c.output_buffer_seconds, self.output_buffer_seconds);
        if self.input_device.is_some() {
            c.input_device = self.input_device;
        }
        if self.output_device.is_some() {
            c.output_device = self.output_device;
        }
        if self.passthrough {
            c.passthrough_original = true;
        }
        set(&mut c.device, self.device);
        c
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("svc=info,svc_core=info")),
        )
        .init();

    let cli = Cli::parse();
    let presets_path = cli.presets.unwrap_or_else(default_presets_path);

    match cli.command {
        Commands::Devices { json } => commands::list_devices(json),
        Commands::Realtime {
            session,
            duration,
            virtual_input,
            virtual_output,
        } => {
            let config = session.resolve(&presets_path)?;
            info!(
                transpose = config.effective_transpose(),
                block_seconds = config.block_seconds,
                crossfade_seconds = config.crossfade_seconds,
                algorithm = %config.realtime_algorithm,
                "starting realtime conversion"
            );
            let virtual_io = virtual_input.map(|input| VirtualIo {
                input,
                output: virtual_output,
            });
            let duration = duration
                .filter(|d| d.is_finite() && *d > 0.0)
                .map(Duration::from_secs_f64);
            commands::run_realtime(config, duration, virtual_io)
        }
        Commands::Convert {
            input,
            output,
            session,
        } => {
            let config = session.resolve(&presets_path)?;
            commands::convert(config, &input, &output)
        }
        Commands::Preset { action } => match action {
            PresetAction::List => commands::preset_list(&presets_path),
            PresetAction::Add { name, session } => {
                let config = session.resolve(&presets_path)?;
                commands::preset_add(&presets_path, &name, config)
            }
            PresetAction::Delete { name } => commands::preset_delete(&presets_path, &name),
            PresetAction::Apply { name, session } => {
                let config = SessionArgs {
                    preset: name,
                    ..session
                }
                .resolve(&presets_path)?;
                commands::preset_apply(&config)
            }
        },
    }
}
