use std::{path::PathBuf, sync::Arc, time::Duration};
use chrono::NaiveDateTime;

use crate::{
    camera::*,
    log_utils::TimeLogger,
    nexus::{self, *},
    options::*,
    plate_solve::{self, *},
    sky_math::{math::*, precession::EpochCvt, sexagesimal::*},
};
use super::{consts::*, events::*};

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum EngineState {
    #[default]
    Idle,
    Capturing,
    Solving,
    Solved,
    SolveFailed,
}

#[derive(Debug, Clone, Default)]
pub struct AlignmentState {
    pub aligned:           bool,
    pub align_count:       u32,
    pub sync_count:        u32,
    pub last_solved:       Option<EqCoord<JNow>>,
    pub last_solved_altaz: Option<HorizCoord>,
    pub last_nexus_altaz:  Option<HorizCoord>,
}

/// Last successful solve
#[derive(Debug, Clone)]
pub struct SolvedPosition {
    pub jnow:            EqCoord<JNow>,
    pub elapsed_seconds: f64,
    pub star_name:       Option<String>,
    pub star_pixel:      Option<(f64, f64)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SolveOutcome {
    Solved,
    NotSolved,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EngineCommand {
    GoSolve,
    Align,
    Goto,
    MeasureOffset,
    ResetOffset,
    ChangeExposure(f64),
    ChangeGain(i32),
    FlipTestMode,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OperationStatus {
    Ok,
    NotConnected,
    NotSolved,
    SolverError(String),
    CameraError(String),
    MountError(String),
    InvalidPosition,
    NoGotoTarget,
    NoStarFound,
}

/// Outcome of engine operation with three handpad display lines
#[derive(Debug, Clone, PartialEq)]
pub struct OperationResult {
    pub status: OperationStatus,
    pub lines:  [String; 3],
}

impl OperationResult {
    fn new(status: OperationStatus, line0: &str, line1: &str, line2: &str) -> Self {
        Self {
            status,
            lines: [line0.to_string(), line1.to_string(), line2.to_string()],
        }
    }

    fn ok(line0: &str, line1: &str, line2: &str) -> Self {
        Self::new(OperationStatus::Ok, line0, line1, line2)
    }

    pub fn is_ok(&self) -> bool {
        self.status == OperationStatus::Ok
    }

    fn from_nexus_error(err: nexus::Error) -> Self {
        match err {
            nexus::Error::NotConnected =>
                Self::new(OperationStatus::NotConnected, "Nexus not connected", "", ""),
            nexus::Error::InvalidPosition(pos) =>
                Self::new(OperationStatus::InvalidPosition, "Invalid position", &pos, ""),
            err =>
                Self::new(OperationStatus::MountError(err.to_string()), "Nexus error", "", ""),
        }
    }

    fn from_solver_error(err: plate_solve::Error) -> Self {
        let text = err.to_string();
        let short = match &err {
            plate_solve::Error::Launch  { .. } => "not started",
            plate_solve::Error::Timeout { .. } => "timeout",
            plate_solve::Error::Exited  { .. } => "exit code",
            plate_solve::Error::Wcs     { .. } => "no WCS",
        };
        Self::new(OperationStatus::SolverError(text), "Solver error", short, "")
    }

    fn from_camera_error(err: anyhow::Error) -> Self {
        Self::new(OperationStatus::CameraError(err.to_string()), "Capture failed", "", "")
    }
}

type Clock = Box<dyn Fn() -> NaiveDateTime + Send>;

/// Capture, solve, delta and align/goto orchestration. Only one
/// operation runs at a time as every operation takes `&mut self`.
pub struct AlignmentEngine {
    nexus:          Nexus,
    camera:         Box<dyn Camera>,
    solver:         PlateSolver,
    options:        Options,
    config_file:    PathBuf,
    location:       Option<ObserverLocation>,
    state:          EngineState,
    alignment:      AlignmentState,
    mount_pointing: Option<EqCoord<JNow>>,
    align_status:   AlignStatus,
    solved:         Option<SolvedPosition>,
    delta:          Option<PointingDelta>,
    clock:          Clock,
    goto_settle:    Duration,
    events:         Arc<EventSubscriptions>,
}

impl AlignmentEngine {
    pub fn new(
        nexus:       Nexus,
        camera:      Box<dyn Camera>,
        solver:      PlateSolver,
        options:     Options,
        config_file: PathBuf,
    ) -> Self {
        Self {
            nexus,
            camera,
            solver,
            options,
            config_file,
            location:       None,
            state:          EngineState::Idle,
            alignment:      AlignmentState::default(),
            mount_pointing: None,
            align_status:   AlignStatus::default(),
            solved:         None,
            delta:          None,
            clock:          Box::new(|| chrono::Utc::now().naive_utc()),
            goto_settle:    GOTO_SETTLE_TIME,
            events:         Arc::new(EventSubscriptions::new()),
        }
    }

    #[cfg(test)]
    pub fn set_clock(&mut self, clock: impl Fn() -> NaiveDateTime + Send + 'static) {
        self.clock = Box::new(clock);
    }

    #[cfg(test)]
    pub fn set_goto_settle(&mut self, duration: Duration) {
        self.goto_settle = duration;
    }

    #[cfg(test)]
    pub fn set_location(&mut self, location: ObserverLocation) {
        self.location = Some(location);
    }

    pub fn events(&self) -> &Arc<EventSubscriptions> {
        &self.events
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn alignment(&self) -> &AlignmentState {
        &self.alignment
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn solved(&self) -> Option<&SolvedPosition> {
        self.solved.as_ref()
    }

    pub fn delta(&self) -> Option<&PointingDelta> {
        self.delta.as_ref()
    }

    pub fn mount_pointing(&self) -> Option<&EqCoord<JNow>> {
        self.mount_pointing.as_ref()
    }

    pub fn align_status(&self) -> &AlignStatus {
        &self.align_status
    }

    pub fn link_mode(&self) -> LinkMode {
        self.nexus.link_mode()
    }

    pub fn camera_name(&self) -> &str {
        self.camera.name()
    }

    fn set_state(&mut self, state: EngineState) {
        if self.state == state {
            return;
        }
        log::debug!("Engine state {:?} -> {:?}", self.state, state);
        self.state = state;
        self.events.notify(Event::StateChanged(state));
    }

    fn show_progress(&self, line0: &str, line1: &str) {
        self.events.notify(Event::message(line0, line1, ""));
    }

    /// Reads observer location and alignment status from mount.
    /// Returns UTC time reported by mount for clock setting.
    pub fn startup(&mut self) -> nexus::Result<NaiveDateTime> {
        let info = self.nexus.read_observer_info()?;
        log::info!(
            "Observer latitude {:.4}, longitude {:.4}",
            info.location.latitude, info.location.longitude
        );
        self.location = Some(info.location);
        let status = self.nexus.query_alignment_status()?;
        if status.is_aligned() {
            log::info!("Nexus is already aligned ({})", status.0);
            self.alignment.aligned = true;
        }
        self.align_status = status;
        Ok(info.utc_time)
    }

    fn read_mount(&mut self) -> nexus::Result<EqCoord<JNow>> {
        let (crd, status) = self.nexus.read_pointing()?;
        self.mount_pointing = Some(crd);
        self.align_status = status;
        Ok(crd)
    }

    /// Captures image into fixed capture file
    pub fn capture(&mut self, offset_mode: bool) -> anyhow::Result<PathBuf> {
        self.set_state(EngineState::Capturing);
        self.show_progress("Image capture", "");
        let extras = CaptureExtras {
            test_image: match (self.options.test_mode, offset_mode) {
                (false, _)    => None,
                (true, true)  => Some(TestImage::Polaris),
                (true, false) => Some(TestImage::M13),
            },
        };
        let label = short_label(self.mount_pointing.as_ref());
        let result = self.camera.capture(
            self.options.exposure_us(),
            self.options.gain,
            &label,
            &extras
        );
        if let Err(err) = &result {
            log::error!("Capture failed: {}", err);
            self.set_state(EngineState::Idle);
        }
        result
    }

    /// Solves captured image. On failure nothing except engine state is changed.
    pub fn solve_image(&mut self, offset_mode: bool) -> plate_solve::Result<SolveOutcome> {
        self.set_state(EngineState::Solving);
        self.show_progress("Plate solving", "");
        let result = match self.solver.solve(offset_mode) {
            Ok(result) => result,
            Err(err) => {
                self.set_state(EngineState::SolveFailed);
                return Err(err);
            }
        };
        if !result.solved {
            self.set_state(EngineState::SolveFailed);
            return Ok(SolveOutcome::NotSolved);
        }
        let Some(wcs) = &result.wcs else {
            self.set_state(EngineState::SolveFailed);
            return Err(plate_solve::Error::Wcs {
                path: PathBuf::new(),
                text: "solver returned no WCS".to_string(),
            });
        };

        let star_pixel = if offset_mode { result.matched_pixel_xy } else { None };
        let (px, py) = match star_pixel {
            Some(pixel) => pixel,
            None => angular_to_pixel_offset(
                self.options.offset.d_x,
                self.options.offset.d_y,
                self.options.pix_scale,
                FRAME_CENTER
            ),
        };
        let j2000 = wcs.pixel_to_sky(px, py);
        let time = (self.clock)();
        let epoch_cvt = EpochCvt::new(&time);
        let jnow = epoch_cvt.to_jnow(&j2000);
        log::info!(
            "Solved pixel ({:.1}, {:.1}) J2000 {:?}, JNow {:?}",
            px, py, j2000, jnow
        );
        if let Some(mount) = &self.mount_pointing {
            log::info!(
                "Solved position is {:.3} deg from Nexus pointing",
                EqCoord::angle_between(mount, &jnow)
            );
            if let Some((x, y)) = wcs.sky_to_pixel(&epoch_cvt.to_j2000(mount)) {
                log::debug!("Nexus pointing is at pixel ({:.1}, {:.1})", x, y);
            }
        }

        self.alignment.last_solved = Some(jnow);
        self.delta = None;
        if let Some(location) = self.location {
            let solved_altaz = location.eq_to_horiz(&jnow, &time);
            self.alignment.last_solved_altaz = Some(solved_altaz);
            if let Some(mount) = &self.mount_pointing {
                let nexus_altaz = location.eq_to_horiz(mount, &time);
                let delta = PointingDelta::calc(&nexus_altaz, &solved_altaz);
                log::info!(
                    "Solved {:?}, Nexus {:?}, delta az={:.2}' alt={:.2}'",
                    solved_altaz, nexus_altaz, delta.az, delta.alt
                );
                self.alignment.last_nexus_altaz = Some(nexus_altaz);
                self.delta = Some(delta);
            }
        }
        self.solved = Some(SolvedPosition {
            jnow,
            elapsed_seconds: result.elapsed_seconds,
            star_name:       result.matched_star_name.clone(),
            star_pixel,
        });
        self.set_state(EngineState::Solved);
        Ok(SolveOutcome::Solved)
    }

    /// Capture and solve. `Ok(None)` means solved.
    fn capture_and_solve(&mut self, offset_mode: bool) -> Option<OperationResult> {
        if let Err(err) = self.capture(offset_mode) {
            return Some(OperationResult::from_camera_error(err));
        }
        match self.solve_image(offset_mode) {
            Ok(SolveOutcome::Solved) =>
                None,
            Ok(SolveOutcome::NotSolved) =>
                Some(OperationResult::new(OperationStatus::NotSolved, "Not Solved", "", "")),
            Err(err) =>
                Some(OperationResult::from_solver_error(err)),
        }
    }

    fn solved_lines(&self) -> OperationResult {
        let Some(solved) = &self.solved else {
            return OperationResult::new(OperationStatus::NotSolved, "Not Solved", "", "");
        };
        let time_str = format!("time: {:.2} s", solved.elapsed_seconds);
        if let Some(delta) = &self.delta {
            OperationResult::ok(
                &format!("Delta: x= {:+.2}", delta.az),
                &format!("       y= {:+.2}", delta.alt),
                &time_str,
            )
        } else {
            OperationResult::ok(
                &format!("Sol: RA {}", degrees_to_sexagesimal(solved.jnow.ra, false, DelimiterStyle::Colon)),
                &format!("   Dec {}", degrees_to_sexagesimal(solved.jnow.dec, true, DelimiterStyle::Colon)),
                &time_str,
            )
        }
    }

    /// Default Select action: read mount, capture, solve and show delta
    pub fn go_solve(&mut self) -> OperationResult {
        let tm = TimeLogger::start();
        match self.read_mount() {
            Ok(_) => {}
            Err(nexus::Error::NotConnected) => {
                self.mount_pointing = None;
            }
            Err(err) => return OperationResult::from_nexus_error(err),
        }
        if let Some(failed) = self.capture_and_solve(false) {
            return failed;
        }
        tm.log("go_solve");
        self.solved_lines()
    }

    /// Syncs mount to solved position
    pub fn align(&mut self) -> OperationResult {
        if let Err(err) = self.read_mount() {
            return OperationResult::from_nexus_error(err);
        }
        if let Some(failed) = self.capture_and_solve(false) {
            return failed;
        }
        let Some(solved) = &self.solved else {
            return OperationResult::new(OperationStatus::NotSolved, "Not Solved", "", "");
        };
        let ra = degrees_to_sexagesimal(solved.jnow.ra, false, DelimiterStyle::Colon);
        let dec = degrees_to_sexagesimal(solved.jnow.dec, true, DelimiterStyle::Align);
        self.show_progress("Aligning", &format!("{} {}", ra, dec));
        match self.align_handshake(&ra, &dec) {
            Ok(status) => {
                let reply = format!("Nexus reply: {}", status.short_text());
                if self.alignment.aligned {
                    OperationResult::ok(
                        "'Select' syncs",
                        &format!("Sync count {}", self.alignment.sync_count),
                        &reply,
                    )
                } else {
                    OperationResult::ok(
                        "'Select' aligns",
                        &format!("align count: {}", self.alignment.align_count),
                        &reply,
                    )
                }
            }
            Err(err) => OperationResult::from_nexus_error(err),
        }
    }

    fn align_handshake(&mut self, ra: &str, dec: &str) -> nexus::Result<AlignStatus> {
        if !self.nexus.send_alignment(ra, dec)? {
            return Err(nexus::Error::InvalidPosition(format!("{} {}", ra, dec)));
        }
        let reply = self.nexus.commit_sync()?;
        log::info!("Sync reply {}", reply);
        let status = self.nexus.query_alignment_status()?;
        if status.is_aligned() {
            self.alignment.aligned = true;
            self.alignment.sync_count += 1;
        } else {
            self.alignment.align_count += 1;
        }
        log::info!(
            "Alignment status {}, align count {}, sync count {}",
            status.0, self.alignment.align_count, self.alignment.sync_count
        );
        self.align_status = status.clone();
        Ok(status)
    }

    /// Syncs on current position then slews to mount's GoTo target
    /// and confirms with new solve
    pub fn goto(&mut self) -> OperationResult {
        let target = match self.nexus.read_goto_target() {
            Ok(Some(target)) => target,
            Ok(None) =>
                return OperationResult::new(OperationStatus::NoGotoTarget, "No GoTo target", "set on Nexus", ""),
            Err(err) =>
                return OperationResult::from_nexus_error(err),
        };
        let align_result = self.align();
        if !align_result.is_ok() {
            return align_result;
        }
        let (ra, dec) = target;
        match self.nexus.set_target_and_slew(&ra, &dec) {
            Ok(reply) => log::info!("GoTo reply {}", reply),
            Err(err) => return OperationResult::from_nexus_error(err),
        }
        self.show_progress("Slewing", &format!("{} {}", ra, dec));
        std::thread::sleep(self.goto_settle);
        self.go_solve()
    }

    /// Solves frame with reference star and stores its position
    /// relative to frame center as new finder offset
    pub fn measure_offset(&mut self) -> anyhow::Result<OperationResult> {
        if let Some(failed) = self.capture_and_solve(true) {
            return Ok(failed);
        }
        let Some(solved) = &self.solved else {
            return Ok(OperationResult::new(OperationStatus::NotSolved, "Not Solved", "", ""));
        };
        let (Some((x, y)), Some(name)) = (solved.star_pixel, solved.star_name.clone()) else {
            return Ok(OperationResult::new(OperationStatus::NoStarFound, "No named star", "found", ""));
        };
        let (d_x, d_y) = pixel_offset_to_angular(x, y, self.options.pix_scale, FRAME_CENTER);
        self.options.offset = OffsetOptions { d_x, d_y };
        log::info!("{} at ({:.1}, {:.1}), new offset {:?}", name, x, y, self.options.offset);
        self.options.save(&self.config_file)?;
        Ok(OperationResult::ok(
            &format!("{} found", name),
            &format!("Offset {}", self.options.offset.display_str()),
            "",
        ))
    }

    pub fn reset_offset(&mut self) -> anyhow::Result<OperationResult> {
        self.options.offset = OffsetOptions::default();
        log::info!("Offset reset");
        self.options.save(&self.config_file)?;
        Ok(OperationResult::ok(
            "Offset reset",
            &format!("Offset {}", self.options.offset.display_str()),
            "",
        ))
    }

    fn change_options(&mut self, fun: impl FnOnce(&mut Options)) -> anyhow::Result<OperationResult> {
        fun(&mut self.options);
        self.options.save(&self.config_file)?;
        let (line0, line1) = self.options.summary_lines();
        Ok(OperationResult::ok(&line0, &line1, ""))
    }

    /// Runs one command. Only config write failure is returned as `Err`.
    pub fn execute(&mut self, command: EngineCommand) -> anyhow::Result<OperationResult> {
        log::info!("Executing {:?}", command);
        let result = match command {
            EngineCommand::GoSolve =>
                self.go_solve(),
            EngineCommand::Align =>
                self.align(),
            EngineCommand::Goto =>
                self.goto(),
            EngineCommand::MeasureOffset =>
                self.measure_offset()?,
            EngineCommand::ResetOffset =>
                self.reset_offset()?,
            EngineCommand::ChangeExposure(delta) =>
                self.change_options(|opts| opts.change_exposure(delta))?,
            EngineCommand::ChangeGain(delta) =>
                self.change_options(|opts| opts.change_gain(delta))?,
            EngineCommand::FlipTestMode =>
                self.change_options(|opts| opts.test_mode = !opts.test_mode)?,
        };
        if !result.is_ok() {
            log::warn!("{:?} finished with {:?}", command, result.status);
        }
        Ok(result)
    }
}

#[cfg(test)]
pub mod test_helpers {
    use std::{collections::VecDeque, sync::{Arc, Mutex}};
    use chrono::NaiveDate;
    use super::*;
    use crate::plate_solve::WcsTan;

    pub struct FakeSolver {
        pub results: Arc<Mutex<VecDeque<plate_solve::Result<SolveResult>>>>,
    }

    impl PlateSolverIface for FakeSolver {
        fn solve(&mut self, _offset_mode: bool) -> plate_solve::Result<SolveResult> {
            self.results.lock().unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(SolveResult::default()))
        }
    }

    pub struct FakeCamera {
        pub captures: Arc<Mutex<Vec<CaptureExtras>>>,
    }

    impl Camera for FakeCamera {
        fn name(&self) -> &str {
            "fake"
        }

        fn capture(
            &mut self,
            _exposure_us: u64,
            _gain:        i32,
            _label:       &str,
            extras:       &CaptureExtras,
        ) -> anyhow::Result<PathBuf> {
            self.captures.lock().unwrap().push(extras.clone());
            Ok(PathBuf::from("capture.jpg"))
        }
    }

    pub fn test_time() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 15).unwrap()
            .and_hms_opt(21, 30, 0).unwrap()
    }

    pub fn test_location() -> ObserverLocation {
        ObserverLocation { latitude: 52.5, longitude: 13.4 }
    }

    /// WCS which maps frame center to given position of date
    pub fn wcs_centered_at(ra: f64, dec: f64) -> WcsTan {
        let j2000 = EpochCvt::new(&test_time()).to_j2000(&EqCoord::<JNow>::new(ra, dec));
        let scale = 15.0 / 3600.0;
        WcsTan {
            crpix: FRAME_CENTER,
            crval: (15.0 * j2000.ra, j2000.dec),
            cd:    [[-scale, 0.0], [0.0, scale]],
        }
    }

    pub fn solved_at(ra: f64, dec: f64) -> plate_solve::Result<SolveResult> {
        Ok(SolveResult {
            solved:          true,
            elapsed_seconds: 1.5,
            wcs:             Some(wcs_centered_at(ra, dec)),
            ..Default::default()
        })
    }

    pub struct TestEngine {
        pub engine:   AlignmentEngine,
        pub sent:     Arc<Mutex<Vec<String>>>,
        pub results:  Arc<Mutex<VecDeque<plate_solve::Result<SolveResult>>>>,
        pub captures: Arc<Mutex<Vec<CaptureExtras>>>,
        pub config:   PathBuf,
    }

    impl Drop for TestEngine {
        fn drop(&mut self) {
            _ = std::fs::remove_file(&self.config);
        }
    }

    pub fn test_engine(name: &str, nexus_replies: Option<&[(&str, &str)]>) -> TestEngine {
        let (nexus, sent) = match nexus_replies {
            Some(replies) => {
                let transport = ScriptedTransport::new(replies);
                let sent = Arc::clone(&transport.sent);
                (Nexus::with_transport(Box::new(transport)), sent)
            }
            None => (Nexus::disconnected(), Arc::new(Mutex::new(Vec::new()))),
        };
        let results = Arc::new(Mutex::new(VecDeque::new()));
        let captures = Arc::new(Mutex::new(Vec::new()));
        let solver = PlateSolver::with_solver(Box::new(FakeSolver {
            results: Arc::clone(&results)
        }));
        let camera = Box::new(FakeCamera { captures: Arc::clone(&captures) });
        let config = std::env::temp_dir().join(
            format!("efinder_engine_{}_{}.config", name, std::process::id())
        );
        let mut engine = AlignmentEngine::new(
            nexus,
            camera,
            solver,
            Options::default(),
            config.clone()
        );
        engine.set_clock(test_time);
        engine.set_location(test_location());
        engine.set_goto_settle(Duration::ZERO);
        TestEngine { engine, sent, results, captures, config }
    }

    pub const MOUNT_AT_10H_20D: &[(&str, &str)] = &[
        (":GR#", "10:00:00"),
        (":GD#", "+20*00:00"),
        (":GW#", "AT2"),
        (":Sr", "1"),
        (":Sd", "1"),
        (":CM#", "Coordinates matched"),
    ];
}

#[cfg(test)]
use test_helpers::*;

#[test]
fn test_same_position_gives_zero_delta() {
    let mut t = test_engine("zero_delta", Some(MOUNT_AT_10H_20D));
    t.results.lock().unwrap().push_back(solved_at(10.0, 20.0));
    let result = t.engine.go_solve();
    assert!(result.is_ok(), "{:?}", result);
    assert_eq!(t.engine.state(), EngineState::Solved);
    let delta = t.engine.delta().unwrap();
    assert!(f64::abs(delta.az) < 0.01, "{:?}", delta);
    assert!(f64::abs(delta.alt) < 0.01, "{:?}", delta);
    assert!(result.lines[0].starts_with("Delta: x= "));
    assert!(result.lines[1].starts_with("       y= "));
    assert_eq!(result.lines[2], "time: 1.50 s");

    let solved = t.engine.alignment().last_solved.unwrap();
    assert!(f64::abs(solved.ra - 10.0) < 1e-5);
    assert!(f64::abs(solved.dec - 20.0) < 1e-5);
}

#[test]
fn test_offset_shifts_solved_position() {
    let mut t = test_engine("offset_delta", Some(MOUNT_AT_10H_20D));
    t.engine.options.offset = OffsetOptions { d_x: 0.0, d_y: 0.5 };
    t.results.lock().unwrap().push_back(solved_at(10.0, 20.0));
    assert!(t.engine.go_solve().is_ok());
    let solved = t.engine.alignment().last_solved.unwrap();
    // FITS y axis of this WCS grows with declination
    assert!(f64::abs(solved.dec - 19.5) < 1e-3, "{:?}", solved);
}

#[test]
fn test_not_solved_keeps_alignment_state() {
    let mut t = test_engine("not_solved", Some(MOUNT_AT_10H_20D));
    t.results.lock().unwrap().push_back(solved_at(10.0, 20.0));
    assert!(t.engine.go_solve().is_ok());
    let prev_altaz = t.engine.alignment().last_solved_altaz.unwrap();

    t.results.lock().unwrap().push_back(Ok(SolveResult::default()));
    let result = t.engine.go_solve();
    assert_eq!(result.status, OperationStatus::NotSolved);
    assert_eq!(result.lines[0], "Not Solved");
    assert_eq!(t.engine.state(), EngineState::SolveFailed);
    assert_eq!(t.engine.alignment().last_solved_altaz, Some(prev_altaz));
}

#[test]
fn test_solver_error_is_distinct() {
    let mut t = test_engine("solver_error", Some(MOUNT_AT_10H_20D));
    t.results.lock().unwrap().push_back(Err(plate_solve::Error::Timeout {
        program: "solve-field".to_string(),
        seconds: 30,
    }));
    let result = t.engine.go_solve();
    assert!(matches!(result.status, OperationStatus::SolverError(_)));
    assert_eq!(result.lines[0], "Solver error");
    assert_eq!(result.lines[1], "timeout");
    assert!(t.engine.alignment().last_solved.is_none());
}

#[test]
fn test_invalid_position_aborts_align() {
    let mut t = test_engine("invalid_pos", Some(&[
        (":GR#", "10:00:00"),
        (":GD#", "+20*00:00"),
        (":GW#", "AT0"),
        (":Sr", "0"),
        (":Sd", "1"),
        (":CM#", "Coordinates matched"),
    ]));
    t.results.lock().unwrap().push_back(solved_at(10.0, 20.0));
    let result = t.engine.align();
    assert_eq!(result.status, OperationStatus::InvalidPosition);
    assert_eq!(result.lines[0], "Invalid position");
    let sent = t.sent.lock().unwrap();
    assert!(sent.iter().any(|cmd| cmd.starts_with(":Sr")));
    assert!(!sent.iter().any(|cmd| cmd == ":CM#"));
    assert!(!sent.iter().any(|cmd| cmd.starts_with(":Sd")));
    assert_eq!(t.engine.alignment().align_count, 0);
    assert_eq!(t.engine.alignment().sync_count, 0);
    assert!(!t.engine.alignment().aligned);
}

#[test]
fn test_align_with_two_star_status_syncs() {
    let mut t = test_engine("align_synced", Some(MOUNT_AT_10H_20D));
    t.results.lock().unwrap().push_back(solved_at(10.0, 20.0));
    let result = t.engine.align();
    assert!(result.is_ok(), "{:?}", result);
    assert!(t.engine.alignment().aligned);
    assert_eq!(t.engine.alignment().sync_count, 1);
    assert_eq!(t.engine.alignment().align_count, 0);
    assert_eq!(result.lines[1], "Sync count 1");
    assert_eq!(result.lines[2], "Nexus reply: AT2");

    let sent = t.sent.lock().unwrap();
    // solved position is 10h +20 within a fraction of arcsecond
    let has = |a: &str, b: &str| sent.iter().any(|cmd| cmd == a || cmd == b);
    assert!(has(":Sr10:00:00#", ":Sr09:59:59#"), "{:?}", sent);
    assert!(has(":Sd+20*00:00#", ":Sd+19*59:59#"), "{:?}", sent);
    assert!(sent.contains(&":CM#".to_string()));
}

#[test]
fn test_align_without_two_stars_counts_align() {
    let mut t = test_engine("align_counted", Some(&[
        (":GR#", "10:00:00"),
        (":GD#", "+20*00:00"),
        (":GW#", "AT1"),
        (":Sr", "1"),
        (":Sd", "1"),
        (":CM#", "Coordinates matched"),
    ]));
    t.results.lock().unwrap().push_back(solved_at(10.0, 20.0));
    let result = t.engine.align();
    assert!(result.is_ok());
    assert!(!t.engine.alignment().aligned);
    assert_eq!(t.engine.alignment().align_count, 1);
    assert_eq!(t.engine.alignment().sync_count, 0);
    assert_eq!(result.lines[1], "align count: 1");
}

#[test]
fn test_align_not_connected() {
    let mut t = test_engine("not_connected", None);
    let result = t.engine.align();
    assert_eq!(result.status, OperationStatus::NotConnected);
    assert_eq!(result.lines[0], "Nexus not connected");
    assert!(t.captures.lock().unwrap().is_empty());
}

#[test]
fn test_go_solve_without_mount_shows_position() {
    let mut t = test_engine("no_mount_solve", None);
    t.results.lock().unwrap().push_back(solved_at(10.0, 20.0));
    let result = t.engine.go_solve();
    assert!(result.is_ok(), "{:?}", result);
    assert!(t.engine.delta().is_none());
    assert!(result.lines[0].starts_with("Sol: RA "));
    assert!(result.lines[1].starts_with("   Dec +"));
}

#[test]
fn test_goto_without_target() {
    let mut t = test_engine("goto_no_target", Some(&[(":Gr#", "00:00:00")]));
    let result = t.engine.goto();
    assert_eq!(result.status, OperationStatus::NoGotoTarget);
    assert_eq!(*t.sent.lock().unwrap(), vec![":Gr#".to_string()]);
}

#[test]
fn test_goto_aligns_slews_and_resolves() {
    let mut replies = MOUNT_AT_10H_20D.to_vec();
    replies.push((":Gr#", "11:30:00"));
    replies.push((":Gd#", "+25*00:00"));
    replies.push((":MS#", "0"));
    let mut t = test_engine("goto_target", Some(&replies));
    t.results.lock().unwrap().push_back(solved_at(10.0, 20.0));
    t.results.lock().unwrap().push_back(solved_at(10.0, 20.0));
    let result = t.engine.goto();
    assert!(result.is_ok(), "{:?}", result);
    let sent = t.sent.lock().unwrap();
    let cm_pos = sent.iter().position(|cmd| cmd == ":CM#").unwrap();
    let ms_pos = sent.iter().position(|cmd| cmd == ":MS#").unwrap();
    assert!(cm_pos < ms_pos);
    assert!(sent.contains(&":Sr11:30:00#".to_string()));
    assert!(sent.contains(&":Sd+25*00:00#".to_string()));
    assert_eq!(t.captures.lock().unwrap().len(), 2);
}

#[test]
fn test_measure_and_reset_offset() {
    let mut t = test_engine("offset_measure", Some(MOUNT_AT_10H_20D));
    t.engine.options.test_mode = true;
    let mut result = solved_at(2.5, 89.2).unwrap();
    result.matched_pixel_xy = Some((700.0, 400.0));
    result.matched_star_name = Some("Polaris".to_string());
    t.results.lock().unwrap().push_back(Ok(result));

    let result = t.engine.measure_offset().unwrap();
    assert!(result.is_ok(), "{:?}", result);
    assert_eq!(result.lines[0], "Polaris found");
    assert_eq!(t.captures.lock().unwrap()[0].test_image, Some(TestImage::Polaris));

    let offset = t.engine.options().offset;
    assert!(f64::abs(offset.d_x - 60.0 * 15.0 / 3600.0) < 1e-9);
    assert!(f64::abs(offset.d_y - 80.0 * 15.0 / 3600.0) < 1e-9);
    let stored = Options::load(&t.config).unwrap();
    assert_eq!(stored.offset, offset);

    let result = t.engine.execute(EngineCommand::ResetOffset).unwrap();
    assert_eq!(result.lines[1], "Offset 0.0,0.0");
    let stored = Options::load(&t.config).unwrap();
    assert_eq!(stored.offset, OffsetOptions::default());
}

#[test]
fn test_measure_offset_without_star() {
    let mut t = test_engine("offset_no_star", Some(MOUNT_AT_10H_20D));
    t.results.lock().unwrap().push_back(solved_at(2.5, 89.2));
    let result = t.engine.measure_offset().unwrap();
    assert_eq!(result.status, OperationStatus::NoStarFound);
    assert_eq!(t.engine.options().offset, OffsetOptions::default());
}

#[test]
fn test_settings_commands_persist() {
    let mut t = test_engine("settings", None);
    let result = t.engine.execute(EngineCommand::ChangeExposure(1.0)).unwrap();
    assert_eq!(result.lines[0], "Ex:2  Gn:20");
    t.engine.execute(EngineCommand::ChangeGain(-5)).unwrap();
    t.engine.execute(EngineCommand::FlipTestMode).unwrap();
    let stored = Options::load(&t.config).unwrap();
    assert_eq!(stored.exposure, 2.0);
    assert_eq!(stored.gain, 15);
    assert!(stored.test_mode);
}

#[test]
fn test_startup_reads_location_and_status() {
    let mut t = test_engine("startup", Some(&[
        (":Gt#", "+52*30"),
        (":Gg#", "-013*24"),
        (":GL#", "22:30:00"),
        (":GC#", "03/15/24"),
        (":GG#", "-1"),
        (":GW#", "AT2"),
    ]));
    let utc = t.engine.startup().unwrap();
    assert_eq!(utc, test_time());
    assert!(t.engine.alignment().aligned);
    let location = t.engine.location.unwrap();
    assert!(f64::abs(location.latitude - 52.5) < 1e-9);
    assert!(f64::abs(location.longitude - 13.4) < 1e-9);
}

#[test]
fn test_progress_events() {
    use std::sync::Mutex;
    let mut t = test_engine("events", Some(MOUNT_AT_10H_20D));
    let messages = Arc::new(Mutex::new(Vec::new()));
    t.engine.events().subscribe({
        let messages = Arc::clone(&messages);
        move |event| if let Event::Message(lines) = event {
            messages.lock().unwrap().push(lines[0].clone());
        }
    });
    t.results.lock().unwrap().push_back(solved_at(10.0, 20.0));
    t.engine.go_solve();
    assert_eq!(*messages.lock().unwrap(), vec!["Image capture", "Plate solving"]);
}
