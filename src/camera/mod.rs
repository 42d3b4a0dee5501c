use std::path::PathBuf;
use anyhow::Context;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TestImage {
    M13,
    Polaris,
}

impl TestImage {
    pub fn file_name(self) -> &'static str {
        match self {
            Self::M13     => "m13.jpg",
            Self::Polaris => "polaris.jpg",
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct CaptureExtras {
    /// Copy canned image instead of exposing
    pub test_image: Option<TestImage>,
}

pub trait Camera: Send {
    fn name(&self) -> &str;

    /// Writes image into capture file and returns its path
    fn capture(
        &mut self,
        exposure_us: u64,
        gain:        i32,
        label:       &str,
        extras:      &CaptureExtras,
    ) -> anyhow::Result<PathBuf>;
}

#[derive(Clone, Debug)]
pub struct CameraPaths {
    pub capture_file: PathBuf,
    pub stills_dir:   PathBuf,
    pub test_dir:     PathBuf,
}

fn copy_test_image(paths: &CameraPaths, image: TestImage) -> anyhow::Result<PathBuf> {
    let src = paths.test_dir.join(image.file_name());
    log::info!("Using test image {:?}", src);
    std::fs::copy(&src, &paths.capture_file)
        .with_context(|| format!("Can't copy {:?} to {:?}", src, paths.capture_file))?;
    Ok(paths.capture_file.clone())
}

///////////////////////////////////////////////////////////////////////////////

/// Camera without hardware. Every capture is canned image (M13 by default).
pub struct TestCamera {
    paths: CameraPaths,
}

impl TestCamera {
    pub fn new(paths: CameraPaths) -> Self {
        Self { paths }
    }
}

impl Camera for TestCamera {
    fn name(&self) -> &str {
        "TEST"
    }

    fn capture(
        &mut self,
        exposure_us: u64,
        gain:        i32,
        label:       &str,
        extras:      &CaptureExtras,
    ) -> anyhow::Result<PathBuf> {
        log::debug!("Test capture exp={}us gain={} label={}", exposure_us, gain, label);
        copy_test_image(&self.paths, extras.test_image.unwrap_or(TestImage::M13))
    }
}

///////////////////////////////////////////////////////////////////////////////

/// Camera driven by external capture program. Template placeholders are
/// `{exposure_us}`, `{exposure}` (seconds), `{gain}` and `{output}`.
pub struct CommandCamera {
    name:     String,
    template: String,
    paths:    CameraPaths,
}

impl CommandCamera {
    pub fn new(name: &str, template: &str, paths: CameraPaths) -> Self {
        Self {
            name: name.to_string(),
            template: template.to_string(),
            paths,
        }
    }

    fn command_line(&self, exposure_us: u64, gain: i32) -> String {
        self.template
            .replace("{exposure_us}", &exposure_us.to_string())
            .replace("{exposure}", &format!("{}", exposure_us as f64 / 1_000_000.0))
            .replace("{gain}", &gain.to_string())
            .replace("{output}", &self.paths.capture_file.to_string_lossy())
    }

    fn archive(&self, label: &str) -> anyhow::Result<()> {
        let time_str = chrono::Local::now().format("%Y%m%d-%H%M%S");
        let dst = self.paths.stills_dir.join(format!("{}_{}.jpg", time_str, label));
        std::fs::copy(&self.paths.capture_file, &dst)
            .with_context(|| format!("Can't archive capture into {:?}", dst))?;
        Ok(())
    }
}

impl Camera for CommandCamera {
    fn name(&self) -> &str {
        &self.name
    }

    fn capture(
        &mut self,
        exposure_us: u64,
        gain:        i32,
        label:       &str,
        extras:      &CaptureExtras,
    ) -> anyhow::Result<PathBuf> {
        if let Some(image) = extras.test_image {
            return copy_test_image(&self.paths, image);
        }
        if self.template.trim().is_empty() {
            anyhow::bail!("No capture command configured for {} camera", self.name);
        }
        let cmd_line = self.command_line(exposure_us, gain);
        log::debug!("Running capture command: {}", cmd_line);
        let output = std::process::Command::new("sh")
            .arg("-c")
            .arg(&cmd_line)
            .output()
            .with_context(|| format!("Can't run {}", cmd_line))?;
        if !output.status.success() {
            anyhow::bail!(
                "Capture command exited with code {}: {}",
                output.status.code().unwrap_or_default(),
                String::from_utf8_lossy(&output.stderr)
            );
        }
        if !self.paths.capture_file.is_file() {
            anyhow::bail!("Capture command didn't write {:?}", self.paths.capture_file);
        }
        if let Err(err) = self.archive(label) {
            log::warn!("{:#}", err);
        }
        Ok(self.paths.capture_file.clone())
    }
}

pub fn create_camera(camera_type: &str, command: &str, paths: CameraPaths) -> Box<dyn Camera> {
    if camera_type.eq_ignore_ascii_case("TEST") {
        Box::new(TestCamera::new(paths))
    } else {
        Box::new(CommandCamera::new(camera_type, command, paths))
    }
}

#[cfg(test)]
fn test_paths(name: &str) -> CameraPaths {
    let dir = std::env::temp_dir().join(format!("efinder_camera_{}_{}", name, std::process::id()));
    let test_dir = dir.join("test");
    let stills_dir = dir.join("Stills");
    std::fs::create_dir_all(&test_dir).unwrap();
    std::fs::create_dir_all(&stills_dir).unwrap();
    std::fs::write(test_dir.join("m13.jpg"), b"m13").unwrap();
    std::fs::write(test_dir.join("polaris.jpg"), b"polaris").unwrap();
    CameraPaths {
        capture_file: dir.join("capture.jpg"),
        stills_dir,
        test_dir,
    }
}

#[cfg(test)]
fn remove_test_dir(paths: &CameraPaths) {
    if let Some(dir) = paths.capture_file.parent() {
        _ = std::fs::remove_dir_all(dir);
    }
}

#[test]
fn test_test_camera() {
    let paths = test_paths("test");
    let mut camera = create_camera("TEST", "", paths.clone());
    assert_eq!(camera.name(), "TEST");

    let file = camera.capture(1_000_000, 20, "no_RADec", &CaptureExtras::default()).unwrap();
    assert_eq!(std::fs::read(&file).unwrap(), b"m13");

    let extras = CaptureExtras { test_image: Some(TestImage::Polaris) };
    let file = camera.capture(1_000_000, 20, "no_RADec", &extras).unwrap();
    assert_eq!(std::fs::read(&file).unwrap(), b"polaris");
    remove_test_dir(&paths);
}

#[test]
fn test_command_camera() {
    let paths = test_paths("cmd");
    let mut camera = CommandCamera::new("ASI", "printf '%s %s' {exposure_us} {gain} > {output}", paths.clone());
    let file = camera.capture(200_000, 25, "164142+362741", &CaptureExtras::default()).unwrap();
    assert_eq!(std::fs::read_to_string(&file).unwrap(), "200000 25");
    let archived: Vec<_> = std::fs::read_dir(&paths.stills_dir).unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .collect();
    assert_eq!(archived.len(), 1);
    assert!(archived[0].ends_with("_164142+362741.jpg"));

    let mut failing = CommandCamera::new("ASI", "exit 3", paths.clone());
    _ = std::fs::remove_file(&paths.capture_file);
    assert!(failing.capture(200_000, 25, "x", &CaptureExtras::default()).is_err());

    let mut unconfigured = CommandCamera::new("QHY", "", paths.clone());
    assert!(unconfigured.capture(200_000, 25, "x", &CaptureExtras::default()).is_err());
    remove_test_dir(&paths);
}

#[test]
fn test_missing_test_image() {
    let mut paths = test_paths("missing");
    paths.test_dir = PathBuf::from("/nonexistent/efinder");
    let mut camera = TestCamera::new(paths.clone());
    assert!(camera.capture(1, 1, "x", &CaptureExtras::default()).is_err());
    remove_test_dir(&paths);
}
