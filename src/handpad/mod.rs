use std::io::BufRead;

use crate::{
    core::{consts::*, engine::*},
    sky_math::{math::HorizCoord, sexagesimal::*},
};

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum HandpadButton {
    Left,
    Up,
    Right,
    Down,
    LongSelect,
    Select,
}

impl HandpadButton {
    /// Code as sent by handpad box
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            16 => Some(Self::Left),
            17 => Some(Self::Up),
            18 => Some(Self::Right),
            19 => Some(Self::Down),
            20 => Some(Self::LongSelect),
            21 => Some(Self::Select),
            _  => None,
        }
    }

    /// Accepts wire codes and, for keyboard handpad, button names
    pub fn from_text(text: &str) -> Option<Self> {
        let text = text.trim();
        if let Ok(code) = text.parse::<u32>() {
            return Self::from_code(code);
        }
        match text.to_ascii_lowercase().as_str() {
            "l" | "left"   => Some(Self::Left),
            "u" | "up"     => Some(Self::Up),
            "r" | "right"  => Some(Self::Right),
            "d" | "down"   => Some(Self::Down),
            "ls" | "long"  => Some(Self::LongSelect),
            "s" | "select" => Some(Self::Select),
            _              => None,
        }
    }
}

/// Reads button lines until reader ends or receiving side is closed
pub fn spawn_button_poller(
    reader: Box<dyn BufRead + Send>,
    sender: async_channel::Sender<HandpadButton>,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let mut reader = reader;
        let mut line = String::new();
        loop {
            // after timeout `line` keeps part of code read so far
            match reader.read_line(&mut line) {
                Ok(0) => {
                    log::info!("Handpad input closed");
                    break;
                }
                Ok(_) => {}
                Err(err) if err.kind() == std::io::ErrorKind::TimedOut => continue,
                Err(err) => {
                    log::error!("Handpad read error: {}", err);
                    break;
                }
            }
            let button = HandpadButton::from_text(&line);
            if button.is_none() && !line.trim().is_empty() {
                log::warn!("Unknown handpad input {:?}", line.trim());
            }
            line.clear();
            let Some(button) = button else { continue; };
            log::debug!("Handpad button {:?}", button);
            if sender.send_blocking(button).is_err() {
                break;
            }
        }
    })
}

///////////////////////////////////////////////////////////////////////////////

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Screen {
    Home,
    Nexus,
    Solution,
    Delta,
    Align,
    Polaris,
    ResetOffset,
    Summary,
    Exposure,
    Gain,
    TestMode,
    Status,
}

const MENU: [&[Screen]; 2] = [
    &[
        Screen::Home, Screen::Nexus, Screen::Solution, Screen::Delta,
        Screen::Align, Screen::Polaris, Screen::ResetOffset,
    ],
    &[
        Screen::Summary, Screen::Exposure, Screen::Gain,
        Screen::TestMode, Screen::Status,
    ],
];

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MenuAction {
    Nothing,
    MoveRow(isize),
    Run(EngineCommand),
}

#[derive(Clone, Copy)]
struct ScreenActions {
    up:          MenuAction,
    down:        MenuAction,
    select:      MenuAction,
    long_select: MenuAction,
}

impl Screen {
    fn actions(self) -> ScreenActions {
        use MenuAction::*;
        let solve_or_goto = ScreenActions {
            up:          Nothing,
            down:        Nothing,
            select:      Run(EngineCommand::GoSolve),
            long_select: Run(EngineCommand::Goto),
        };
        let only_select = |cmd| ScreenActions {
            up:          Nothing,
            down:        Nothing,
            select:      Run(cmd),
            long_select: Nothing,
        };
        let up_down = |up, down| ScreenActions {
            up:   Run(up),
            down: Run(down),
            ..solve_or_goto
        };
        match self {
            Self::Home => ScreenActions {
                down: MoveRow(1),
                ..only_select(EngineCommand::GoSolve)
            },
            Self::Summary => ScreenActions {
                up: MoveRow(-1),
                ..only_select(EngineCommand::GoSolve)
            },
            Self::Nexus | Self::Solution | Self::Delta | Self::Status =>
                solve_or_goto,
            Self::Align =>
                only_select(EngineCommand::Align),
            Self::Polaris =>
                only_select(EngineCommand::MeasureOffset),
            Self::ResetOffset =>
                only_select(EngineCommand::ResetOffset),
            Self::Exposure => up_down(
                EngineCommand::ChangeExposure(EXPOSURE_STEP),
                EngineCommand::ChangeExposure(-EXPOSURE_STEP),
            ),
            Self::Gain => up_down(
                EngineCommand::ChangeGain(GAIN_STEP),
                EngineCommand::ChangeGain(-GAIN_STEP),
            ),
            Self::TestMode => up_down(
                EngineCommand::FlipTestMode,
                EngineCommand::FlipTestMode,
            ),
        }
    }
}

/// Handpad screens. Left/Right scroll inside row, Up/Down move
/// between rows only where screen allows it.
#[derive(Default)]
pub struct Menu {
    row: usize,
    col: usize,
}

impl Menu {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn screen(&self) -> Screen {
        MENU[self.row][self.col]
    }

    /// Navigates menu and returns engine command bound to button on current screen
    pub fn on_button(&mut self, button: HandpadButton) -> Option<EngineCommand> {
        let actions = self.screen().actions();
        let action = match button {
            HandpadButton::Left => {
                self.col = self.col.saturating_sub(1);
                MenuAction::Nothing
            }
            HandpadButton::Right => {
                self.col = usize::min(self.col + 1, MENU[self.row].len() - 1);
                MenuAction::Nothing
            }
            HandpadButton::Up         => actions.up,
            HandpadButton::Down       => actions.down,
            HandpadButton::Select     => actions.select,
            HandpadButton::LongSelect => actions.long_select,
        };
        match action {
            MenuAction::Nothing => None,
            MenuAction::MoveRow(step) => {
                self.row = self.row.saturating_add_signed(step).min(MENU.len() - 1);
                self.col = self.col.min(MENU[self.row].len() - 1);
                None
            }
            MenuAction::Run(command) => Some(command),
        }
    }

    pub fn screen_lines(&self, engine: &AlignmentEngine) -> [String; 3] {
        let lines = |l0: &str, l1: &str, l2: &str| [l0.to_string(), l1.to_string(), l2.to_string()];
        let options = engine.options();
        match self.screen() {
            Screen::Home =>
                lines("ScopeDog", "eFinder", &format!("ver {}", env!("CARGO_PKG_VERSION"))),
            Screen::Nexus => match engine.mount_pointing() {
                Some(crd) => lines(
                    &format!("Nex: RA {}", degrees_to_sexagesimal(crd.ra, false, DelimiterStyle::Colon)),
                    &format!("    Dec {}", degrees_to_sexagesimal(crd.dec, true, DelimiterStyle::Colon)),
                    &engine.alignment().last_nexus_altaz.map(altaz_str).unwrap_or_default(),
                ),
                None => lines("Nex: RA", "    Dec", ""),
            },
            Screen::Solution => match engine.solved() {
                Some(solved) => lines(
                    &format!("Sol: RA {}", degrees_to_sexagesimal(solved.jnow.ra, false, DelimiterStyle::Colon)),
                    &format!("   Dec {}", degrees_to_sexagesimal(solved.jnow.dec, true, DelimiterStyle::Colon)),
                    &engine.alignment().last_solved_altaz.map(altaz_str).unwrap_or_default(),
                ),
                None => lines("No solution yet", "'select' solves", ""),
            },
            Screen::Delta => match (engine.delta(), engine.solved()) {
                (Some(delta), Some(solved)) => lines(
                    &format!("Delta: x= {:+.2}", delta.az),
                    &format!("       y= {:+.2}", delta.alt),
                    &format!("time: {:.2} s", solved.elapsed_seconds),
                ),
                _ => lines("Delta: No solve", "'select' solves", ""),
            },
            Screen::Align => {
                let alignment = engine.alignment();
                let status = engine.align_status().short_text().to_string();
                if alignment.aligned {
                    lines("'Select' syncs", &format!("Sync count {}", alignment.sync_count), &status)
                } else if alignment.align_count == 0 {
                    lines("'Select' aligns", "not aligned yet", &status)
                } else {
                    lines("'Select' aligns", &format!("align count: {}", alignment.align_count), &status)
                }
            }
            Screen::Polaris =>
                lines("'Select' Polaris", &options.offset.display_str(), ""),
            Screen::ResetOffset =>
                lines("'Select' Resets", &options.offset.display_str(), ""),
            Screen::Summary => {
                let (line0, line1) = options.summary_lines();
                lines(&line0, &line1, &format!("Camera: {}", engine.camera_name()))
            }
            Screen::Exposure =>
                lines("Exposure", &options.exposure.to_string(), ""),
            Screen::Gain =>
                lines("Gain", &options.gain.to_string(), ""),
            Screen::TestMode =>
                lines("Test mode", if options.test_mode { "1" } else { "0" }, ""),
            Screen::Status => lines(
                &format!("Nexus via {}", engine.link_mode().as_str()),
                &format!("Nex align {}", engine.align_status().short_text()),
                &format!("State {:?}", engine.state()),
            ),
        }
    }

    /// Handles one button press. Returns lines to display.
    pub fn process_button(
        &mut self,
        engine: &mut AlignmentEngine,
        button: HandpadButton,
    ) -> anyhow::Result<[String; 3]> {
        let Some(command) = self.on_button(button) else {
            return Ok(self.screen_lines(engine));
        };
        let result = engine.execute(command)?;
        let is_setting = matches!(
            command,
            EngineCommand::ChangeExposure(_) |
            EngineCommand::ChangeGain(_) |
            EngineCommand::FlipTestMode
        );
        if is_setting {
            Ok(self.screen_lines(engine))
        } else {
            Ok(result.lines)
        }
    }
}

fn altaz_str(crd: HorizCoord) -> String {
    format!("Az{:6.1} Alt{:+5.1}", crd.az, crd.alt)
}

#[test]
fn test_button_codes() {
    assert_eq!(HandpadButton::from_code(16), Some(HandpadButton::Left));
    assert_eq!(HandpadButton::from_code(21), Some(HandpadButton::Select));
    assert_eq!(HandpadButton::from_code(22), None);
    assert_eq!(HandpadButton::from_text("20\r\n"), Some(HandpadButton::LongSelect));
    assert_eq!(HandpadButton::from_text(" Select "), Some(HandpadButton::Select));
    assert_eq!(HandpadButton::from_text("x"), None);
}

#[test]
fn test_menu_navigation() {
    let mut menu = Menu::new();
    assert_eq!(menu.on_button(HandpadButton::Left), None);
    assert_eq!(menu.screen(), Screen::Home);
    assert_eq!(menu.on_button(HandpadButton::Select), Some(EngineCommand::GoSolve));

    for _ in 0..4 {
        menu.on_button(HandpadButton::Right);
    }
    assert_eq!(menu.screen(), Screen::Align);
    assert_eq!(menu.on_button(HandpadButton::Select), Some(EngineCommand::Align));
    assert_eq!(menu.on_button(HandpadButton::LongSelect), None);

    menu.on_button(HandpadButton::Right);
    menu.on_button(HandpadButton::Right);
    assert_eq!(menu.screen(), Screen::ResetOffset);
    assert_eq!(menu.on_button(HandpadButton::Right), None);
    assert_eq!(menu.screen(), Screen::ResetOffset);
    assert_eq!(menu.on_button(HandpadButton::Select), Some(EngineCommand::ResetOffset));
    assert_eq!(menu.on_button(HandpadButton::Down), None);
    assert_eq!(menu.screen(), Screen::ResetOffset);
}

#[test]
fn test_menu_settings_row() {
    let mut menu = Menu::new();
    menu.on_button(HandpadButton::Down);
    assert_eq!(menu.screen(), Screen::Summary);
    menu.on_button(HandpadButton::Right);
    assert_eq!(menu.screen(), Screen::Exposure);
    assert_eq!(
        menu.on_button(HandpadButton::Up),
        Some(EngineCommand::ChangeExposure(EXPOSURE_STEP))
    );
    menu.on_button(HandpadButton::Right);
    assert_eq!(
        menu.on_button(HandpadButton::Down),
        Some(EngineCommand::ChangeGain(-GAIN_STEP))
    );
    assert_eq!(menu.on_button(HandpadButton::LongSelect), Some(EngineCommand::Goto));
    menu.on_button(HandpadButton::Right);
    assert_eq!(menu.on_button(HandpadButton::Up), Some(EngineCommand::FlipTestMode));
    menu.on_button(HandpadButton::Right);
    menu.on_button(HandpadButton::Right);
    assert_eq!(menu.screen(), Screen::Status);

    for _ in 0..4 {
        menu.on_button(HandpadButton::Left);
    }
    assert_eq!(menu.screen(), Screen::Summary);
    menu.on_button(HandpadButton::Up);
    assert_eq!(menu.screen(), Screen::Home);
}

#[test]
fn test_button_poller() {
    let input = "21\nnoise\n\nleft\n16\n";
    let (sender, receiver) = async_channel::bounded(16);
    let handle = spawn_button_poller(Box::new(std::io::Cursor::new(input)), sender);
    handle.join().unwrap();
    let mut buttons = Vec::new();
    while let Ok(button) = receiver.try_recv() {
        buttons.push(button);
    }
    assert_eq!(buttons, [HandpadButton::Select, HandpadButton::Left, HandpadButton::Left]);
}

#[test]
fn test_button_poller_keeps_code_split_by_timeout() {
    /// Serial port that times out between chunks
    struct ChunkedPort(std::collections::VecDeque<Option<&'static [u8]>>);

    impl std::io::Read for ChunkedPort {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            match self.0.pop_front() {
                None => Ok(0),
                Some(None) => Err(std::io::ErrorKind::TimedOut.into()),
                Some(Some(chunk)) => {
                    buf[..chunk.len()].copy_from_slice(chunk);
                    Ok(chunk.len())
                }
            }
        }
    }

    let port = ChunkedPort([Some(&b"2"[..]), None, Some(&b"0\n1"[..]), None, Some(&b"9\n"[..])].into());
    let (sender, receiver) = async_channel::bounded(16);
    let handle = spawn_button_poller(Box::new(std::io::BufReader::new(port)), sender);
    handle.join().unwrap();
    let mut buttons = Vec::new();
    while let Ok(button) = receiver.try_recv() {
        buttons.push(button);
    }
    assert_eq!(buttons, [HandpadButton::LongSelect, HandpadButton::Down]);
}

#[test]
fn test_process_button_shows_changed_setting() {
    use crate::core::engine::test_helpers::*;
    let mut t = test_engine("handpad_exposure", None);
    let mut menu = Menu::new();
    menu.process_button(&mut t.engine, HandpadButton::Down).unwrap();
    let lines = menu.process_button(&mut t.engine, HandpadButton::Right).unwrap();
    assert_eq!(lines, ["Exposure", "1", ""]);
    let lines = menu.process_button(&mut t.engine, HandpadButton::Up).unwrap();
    assert_eq!(lines, ["Exposure", "2", ""]);

    menu.process_button(&mut t.engine, HandpadButton::Up).unwrap();
    menu.process_button(&mut t.engine, HandpadButton::Left).unwrap();
    let lines = menu.process_button(&mut t.engine, HandpadButton::Up).unwrap();
    assert_eq!(lines[0], "ScopeDog");
    let lines = menu.process_button(&mut t.engine, HandpadButton::Select).unwrap();
    assert_eq!(lines[0], "Not Solved");
}
