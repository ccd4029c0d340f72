//! Replay a recorded sensor stream through the calibration engine.
//!
//! The input is JSON Lines, one tagged record per line in capture order.
//! `assign` and `neutral` records must precede the data they describe; the
//! session starts when the first data record arrives. Identical inputs
//! reproduce identical artifacts, which makes field captures debuggable on
//! a desk.
//!
//! Usage:
//! ```
//! cargo run --bin replay -- session.jsonl --topology lower --artifact qc.json
//! ```

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

use anyhow::Context;
use capture::{DeviceId, NeutralPoseLookup, SegmentId, SensorAssignment, SensorSample, Topology};
use clap::{Parser, ValueEnum};
use log::LevelFilter;
use mortise::{CalEvent, CalState, CalibrationEngine, EngineConfig};
use nalgebra::Vector3;
use serde::Deserialize;
use tare_math::Quaternion;

/// Command line arguments for the replay tool
#[derive(Parser, Debug)]
#[command(
    name = "replay",
    about = "Replay a recorded sensor stream through the calibration engine",
    long_about = None
)]
struct Args {
    /// Recorded stream (JSON Lines, one record per line)
    stream: PathBuf,

    /// Body topology to calibrate
    #[arg(long, value_enum, default_value_t = TopologyArg::Full)]
    topology: TopologyArg,

    /// Engine configuration overrides (JSON, missing fields take defaults)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the QC artifact to this path as JSON
    #[arg(long)]
    artifact: Option<PathBuf>,

    /// Print every engine update as it is emitted
    #[arg(long)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TopologyArg {
    Full,
    Lower,
    Upper,
}

impl From<TopologyArg> for Topology {
    fn from(arg: TopologyArg) -> Self {
        match arg {
            TopologyArg::Full => Topology::FullBody,
            TopologyArg::Lower => Topology::LowerBody,
            TopologyArg::Upper => Topology::UpperBody,
        }
    }
}

/// One line of a recorded stream.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RecordedLine {
    Assign {
        device: u16,
        segment: SegmentId,
    },
    Neutral {
        segment: SegmentId,
        /// w, x, y, z
        quat: [f64; 4],
    },
    Sample {
        device: u16,
        t: f64,
        gyro: [f64; 3],
        accel: [f64; 3],
        /// w, x, y, z
        quat: [f64; 4],
    },
    Position {
        device: u16,
        t: f64,
        position: [f64; 3],
    },
    Lost {
        device: u16,
    },
    Tick {
        t: f64,
    },
}

fn data_event(record: RecordedLine) -> Option<CalEvent> {
    match record {
        RecordedLine::Sample {
            device,
            t,
            gyro,
            accel,
            quat,
        } => Some(CalEvent::Sample {
            device: DeviceId(device),
            sample: SensorSample::from_parts(gyro, accel, quat, t),
        }),
        RecordedLine::Position {
            device,
            t,
            position,
        } => Some(CalEvent::Position {
            device: DeviceId(device),
            timestamp_sec: t,
            position: Vector3::new(position[0], position[1], position[2]),
        }),
        RecordedLine::Lost { device } => Some(CalEvent::DeviceLost {
            device: DeviceId(device),
        }),
        RecordedLine::Tick { t } => Some(CalEvent::Tick { now_sec: t }),
        RecordedLine::Assign { .. } | RecordedLine::Neutral { .. } => None,
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();

    let config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("parsing config {}", path.display()))?
        }
        None => EngineConfig::default(),
    };
    let mut engine =
        CalibrationEngine::new(config).context("engine rejected the configuration")?;
    if args.verbose {
        engine.register_callback(|update| println!("{update:?}"));
    }

    let file = File::open(&args.stream)
        .with_context(|| format!("opening {}", args.stream.display()))?;
    let reader = BufReader::new(file);

    let mut assignment = SensorAssignment::new();
    let mut neutral_poses = NeutralPoseLookup::new();
    let mut started = false;
    let mut records = 0u64;

    for (index, line) in reader.lines().enumerate() {
        let line_no = index + 1;
        let line = line.with_context(|| format!("reading line {line_no}"))?;
        if line.trim().is_empty() {
            continue;
        }
        let record: RecordedLine =
            serde_json::from_str(&line).with_context(|| format!("parsing line {line_no}"))?;
        records += 1;

        match record {
            RecordedLine::Assign { device, segment } => {
                anyhow::ensure!(
                    !started,
                    "assignment record after the session started (line {line_no})"
                );
                assignment.assign(segment, DeviceId(device));
                continue;
            }
            RecordedLine::Neutral { segment, quat } => {
                anyhow::ensure!(
                    !started,
                    "neutral pose record after the session started (line {line_no})"
                );
                neutral_poses.set(
                    segment,
                    Quaternion::new(quat[0], quat[1], quat[2], quat[3]),
                );
                continue;
            }
            _ => {}
        }

        if !started {
            engine
                .process_event(CalEvent::Start {
                    topology: args.topology.into(),
                    assignment: assignment.clone(),
                    neutral_poses: neutral_poses.clone(),
                })
                .with_context(|| format!("starting the session (line {line_no})"))?;
            started = true;
        }

        let Some(event) = data_event(record) else {
            continue;
        };
        match engine.process_event(event) {
            Ok(_) => {}
            Err(err) => {
                if matches!(engine.state(), CalState::Error { .. }) {
                    // Hard failure: stop replaying, the partial artifact
                    // below still shows what was captured.
                    log::error!("replay stopped at line {line_no}: {err}");
                    break;
                }
                return Err(err).with_context(|| format!("processing line {line_no}"));
            }
        }
    }

    println!(
        "processed {records} records from {} (final state {})",
        args.stream.display(),
        engine.state().name()
    );

    match engine.qc_artifact() {
        Some(artifact) => {
            println!();
            print!("{}", artifact.render_text());
            if let Some(path) = &args.artifact {
                artifact
                    .save_to_file(path)
                    .with_context(|| format!("writing {}", path.display()))?;
                println!("artifact written to {}", path.display());
            }
        }
        None => println!("no session data captured"),
    }
    Ok(())
}
