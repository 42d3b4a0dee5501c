#![allow(
    clippy::too_many_arguments,
    clippy::upper_case_acronyms,
    clippy::uninlined_format_args,
    clippy::new_without_default
)]

mod camera;
mod core;
mod display;
mod handpad;
mod image;
mod log_utils;
mod nexus;
mod options;
mod plate_solve;
mod sky_math;
mod utils;

use std::{io::BufReader, path::{Path, PathBuf}, sync::{Arc, Mutex}, time::Duration};
use clap::Parser;

use crate::{
    camera::*,
    core::{engine::*, events::*},
    display::*,
    handpad::*,
    nexus::*,
    options::Options,
    plate_solve::*,
    utils::io_utils::*,
};

const HANDPAD_DEVICE: &str = "/dev/ttyACM0";
const HANDPAD_BAUD_RATE: u32 = 115200;
const LOG_RETENTION_DAYS: u64 = 14;

#[derive(Parser, Debug)]
#[command(version, about = "Telescope electronic finder for Nexus DSC")]
struct CliArgs {
    /// Read buttons from stdin instead of handpad box
    #[arg(long)]
    fake_handpad: bool,

    /// Use canned test images instead of camera
    #[arg(long)]
    fake_camera: bool,

    /// Use simulated mount instead of Nexus DSC
    #[arg(long)]
    fake_nexus: bool,

    /// Debug level logging
    #[arg(short = 'x', long)]
    verbose: bool,

    /// Write log into file under application directory
    #[arg(short = 'l', long)]
    log: bool,

    /// Keep scratch images in temporary directory instead of /dev/shm
    #[arg(short = 'n', long)]
    notmp: bool,

    /// Directory for scratch images
    #[arg(long)]
    images_dir: Option<PathBuf>,

    /// Configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Don't set system clock from Nexus
    #[arg(long)]
    no_clock_sync: bool,
}

fn panic_handler(
    panic_info:        &std::panic::PanicHookInfo,
    def_panic_handler: &(dyn Fn(&std::panic::PanicHookInfo<'_>) + 'static + Sync + Send),
) {
    let payload_str =
        if let Some(msg) = panic_info.payload().downcast_ref::<&'static str>() {
            Some(*msg)
        } else if let Some(msg) = panic_info.payload().downcast_ref::<String>() {
            Some(msg.as_str())
        } else {
            None
        };

    log::error!("PANIC OCCURRED");

    if let Some(payload) = &payload_str {
        log::error!("Panic payload: {}", payload);
    }

    if let Some(loc) = panic_info.location() {
        log::error!("Panic location: {}", loc);
    }

    log::error!(
        "Panic stacktrace: {}",
        std::backtrace::Backtrace::force_capture()
    );

    def_panic_handler(panic_info);
}

struct HandpadIo {
    display: Box<dyn Display>,
    input:   Box<dyn std::io::BufRead + Send>,
}

fn open_handpad(fake: bool) -> HandpadIo {
    let stdin_io = || HandpadIo {
        display: Box::new(LogDisplay),
        input:   Box::new(BufReader::new(std::io::stdin())),
    };
    if fake {
        log::info!("Reading handpad buttons from stdin");
        return stdin_io();
    }
    let open = || -> anyhow::Result<HandpadIo> {
        let port = serialport::new(HANDPAD_DEVICE, HANDPAD_BAUD_RATE)
            .timeout(Duration::from_secs(1))
            .open()?;
        let reader = port.try_clone()?;
        Ok(HandpadIo {
            display: Box::new(HandpadBoxDisplay::new(Box::new(port))),
            input:   Box::new(BufReader::new(reader)),
        })
    };
    match open() {
        Ok(io) => {
            log::info!("Handpad box connected at {}", HANDPAD_DEVICE);
            io
        }
        Err(err) => {
            log::error!("Can't open handpad box {}: {}. Using stdin", HANDPAD_DEVICE, err);
            stdin_io()
        }
    }
}

fn connect_nexus(fake: bool) -> Nexus {
    if fake {
        log::info!("Using simulated Nexus");
        return Nexus::with_transport(Box::new(SimulatedMount::new()));
    }
    Nexus::connect()
}

fn create_engine(args: &CliArgs, paths: &AppPaths) -> anyhow::Result<AlignmentEngine> {
    let mut options = Options::load(&paths.config_file)?;
    if args.fake_camera {
        options.camera_type = "TEST".to_string();
    }
    let camera = create_camera(
        &options.camera_type,
        &options.camera_command,
        CameraPaths {
            capture_file: paths.capture_file(),
            stills_dir:   paths.stills_dir.clone(),
            test_dir:     paths.test_dir.clone(),
        }
    );
    log::info!("Camera: {}", camera.name());
    let solver = PlateSolver::new(PlateSolveConfig {
        image_file: paths.capture_file(),
        pix_scale:  options.pix_scale,
        ..Default::default()
    });
    let nexus = connect_nexus(args.fake_nexus);
    log::info!("Nexus link: {}", nexus.link_mode().as_str());
    Ok(AlignmentEngine::new(nexus, camera, solver, options, paths.config_file.clone()))
}

fn startup_engine(engine: &mut AlignmentEngine, set_clock: bool) {
    match engine.startup() {
        Ok(utc_time) => if set_clock {
            if let Err(err) = set_system_clock(&utc_time) {
                log::error!("Can't set system clock: {}", err);
            }
        },
        Err(nexus::Error::NotConnected) =>
            log::warn!("Nexus not connected, observer location unknown"),
        Err(err) =>
            log::error!("Can't read observer info from Nexus: {}", err),
    }
}

fn run(args: CliArgs, paths: AppPaths) -> anyhow::Result<()> {
    let handpad = open_handpad(args.fake_handpad);
    let display = Arc::new(Mutex::new(handpad.display));

    let mut engine = create_engine(&args, &paths)?;
    let set_clock = !args.no_clock_sync && !args.fake_nexus;
    startup_engine(&mut engine, set_clock);

    engine.events().subscribe({
        let display = Arc::clone(&display);
        move |event| if let Event::Message(lines) = event {
            display.lock().unwrap().display(&lines[0], &lines[1], &lines[2]);
        }
    });

    let mut menu = Menu::new();
    {
        let [l0, l1, l2] = menu.screen_lines(&engine);
        display.lock().unwrap().display(&l0, &l1, &l2);
    }

    let (sender, receiver) = async_channel::bounded(16);
    let poller = spawn_button_poller(handpad.input, sender);

    while let Ok(button) = receiver.recv_blocking() {
        let [l0, l1, l2] = menu.process_button(&mut engine, button)?;
        display.lock().unwrap().display(&l0, &l1, &l2);

        // presses made while operation was running are dropped
        let mut dropped = 0;
        while receiver.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped != 0 {
            log::debug!("Dropped {} handpad presses", dropped);
        }
    }

    log::info!("Handpad poller finished");
    _ = poller.join();
    Ok(())
}

fn init_logging(args: &CliArgs, logs_dir: &Path) -> anyhow::Result<flexi_logger::LoggerHandle> {
    if args.log {
        create_path(logs_dir)?;
        log_utils::cleanup_old_logs(logs_dir, LOG_RETENTION_DAYS);
        log_utils::start_logger(Some(logs_dir), args.verbose)
    } else {
        log_utils::start_logger(None, args.verbose)
    }
}

fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    let paths = AppPaths::new(
        get_app_dir()?,
        args.images_dir.clone(),
        args.config.clone(),
        args.notmp,
    );
    let _logger = init_logging(&args, &paths.logs_dir)?;

    log::info!(
        "{} {} ver. {} is started",
        env!("CARGO_PKG_NAME"),
        std::env::consts::ARCH,
        env!("CARGO_PKG_VERSION")
    );
    log::debug!("{:?}", args);
    log::debug!("{:?}", paths);

    std::panic::set_hook({
        let default_panic_handler = std::panic::take_hook();
        Box::new(move |panic_info| {
            panic_handler(panic_info, &*default_panic_handler)
        })
    });

    paths.create_dirs()?;
    run(args, paths)
}
