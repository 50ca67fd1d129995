// CrabCapture demo
// Opens a camera, streams image frames and PCM audio, optionally records, then closes.
//
// Usage: capture-demo [--frames <n>] [--skip <n>] [--record <dir>] [--config <path>] [--native] [--json]

use anyhow::{bail, Context};
use crabcapture::image_stream::ImageFrame;
use crabcapture::permissions::StaticPermissions;
use crabcapture::platform::simulated::{SimulatedAudioSource, SimulatedDriver, SimulatedRecorderFactory};
use crabcapture::platform::CameraDriver;
use crabcapture::recording::VideoRecordRequest;
use crabcapture::testing::{audio_channel, image_channel};
use crabcapture::{AudioStreamRequest, CameraRequest, CrabCaptureConfig, ImageStreamRequest, PipelineController};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct Options {
    frames: usize,
    skip: Option<u32>,
    record: Option<PathBuf>,
    config: Option<PathBuf>,
    native: bool,
    json: bool,
}

fn parse_args() -> anyhow::Result<Options> {
    let mut options = Options {
        frames: 30,
        skip: None,
        record: None,
        config: None,
        native: false,
        json: false,
    };

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--frames" => {
                let value = args.next().context("--frames needs a value")?;
                options.frames = value.parse().context("--frames must be a number")?;
            }
            "--skip" => {
                let value = args.next().context("--skip needs a value")?;
                options.skip = Some(value.parse().context("--skip must be a number")?);
            }
            "--record" => options.record = Some(PathBuf::from(args.next().context("--record needs a directory")?)),
            "--config" => options.config = Some(PathBuf::from(args.next().context("--config needs a path")?)),
            "--native" => options.native = true,
            "--json" => options.json = true,
            other => bail!("Unknown argument: {}", other),
        }
    }
    Ok(options)
}

#[cfg(feature = "native")]
fn native_driver() -> anyhow::Result<Arc<dyn CameraDriver>> {
    Ok(Arc::new(crabcapture::platform::native::NokhwaDriver::new()))
}

#[cfg(not(feature = "native"))]
fn native_driver() -> anyhow::Result<Arc<dyn CameraDriver>> {
    bail!("built without the `native` feature")
}

fn build_controller(options: &Options, config: CrabCaptureConfig) -> anyhow::Result<PipelineController> {
    if options.native {
        return Ok(PipelineController::builder(native_driver()?).config(config).build());
    }

    let driver = SimulatedDriver::with_default_cameras().with_frame_interval(Duration::from_millis(33));
    let builder = PipelineController::builder(Arc::new(driver))
        .config(config)
        .permissions(Arc::new(StaticPermissions::granted()))
        .audio_source(Arc::new(SimulatedAudioSource::new()));
    let builder = if cfg!(feature = "recording") {
        builder
    } else {
        builder.recorders(Arc::new(SimulatedRecorderFactory::new()))
    };
    Ok(builder.build())
}

fn describe(frame: &ImageFrame) -> String {
    format!(
        "{}x{} {} planes={} rotation={}",
        frame.width,
        frame.height,
        frame.format.name(),
        frame.planes.len(),
        frame.rotation_degrees
    )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    crabcapture::init_logging();
    let options = parse_args()?;

    let config = match &options.config {
        Some(path) => CrabCaptureConfig::load_from_file(path)?,
        None => CrabCaptureConfig::load_or_default(),
    };
    let controller = build_controller(&options, config.clone())?;

    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = interrupted.clone();
    ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst)).context("Failed to install Ctrl-C handler")?;

    for camera in controller.list_cameras().await? {
        println!("camera {}: {} ({:?}, sensor {}°)", camera.id, camera.name, camera.facing, camera.sensor_orientation);
    }

    let camera = controller.open(CameraRequest::from_config(&config)).await?;
    if options.json {
        println!("{}", serde_json::to_string(&camera)?);
    } else {
        println!(
            "Opened at {}@{} (texture {})",
            camera.video_size, camera.video_frame_rate, camera.texture_id
        );
    }

    let mut image_request = ImageStreamRequest::from_config(&config);
    if let Some(skip) = options.skip {
        image_request.frame_skip_interval = skip;
    }
    let (image_sink, images) = image_channel();
    controller.start_image_stream(image_request, image_sink).await?;

    let (audio_sink, audio) = audio_channel();
    if let Err(e) = controller
        .start_audio_stream(AudioStreamRequest::from_config(&config), audio_sink)
        .await
    {
        log::warn!("Audio stream unavailable: {}", e);
    }

    let recording = match &options.record {
        Some(dir) => {
            let mut request = VideoRecordRequest::from_config(&config);
            request.output_directory = dir.clone();
            let path = controller.start_recording(request).await?;
            println!("Recording to {}", path.display());
            true
        }
        None => false,
    };

    let mut received = 0;
    while received < options.frames && !interrupted.load(Ordering::SeqCst) {
        match images.recv_timeout(Duration::from_secs(2)) {
            Ok(frame) => {
                received += 1;
                if options.json {
                    println!("{}", serde_json::json!({ "frame": received, "description": describe(&frame) }));
                } else {
                    println!("frame {}: {}", received, describe(&frame));
                }
            }
            Err(_) => {
                log::warn!("No image frame within 2s");
                break;
            }
        }
    }

    let audio_bytes: usize = audio.try_iter().map(|chunk| chunk.len()).sum();
    println!("Received {} image frames and {} bytes of PCM audio", received, audio_bytes);

    if recording {
        let path = controller.stop_recording().await?;
        println!("Recording finished: {}", path.display());
    }

    let status = controller.status().await;
    println!("{}", serde_json::to_string_pretty(&status)?);

    controller.stop_audio_stream().await?;
    controller.stop_image_stream().await?;
    controller.close().await?;
    Ok(())
}
