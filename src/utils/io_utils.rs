use std::path::{PathBuf, Path};

pub fn get_app_dir() -> anyhow::Result<PathBuf> {
    let conf_dir = dirs::config_dir()
        .ok_or_else(|| anyhow::anyhow!("dirs::config_dir()"))?;
    let mut path = PathBuf::from(&conf_dir);
    path.push(format!(".{}", env!("CARGO_PKG_NAME")));
    Ok(path)
}

pub fn create_path(path: &Path) -> anyhow::Result<()> {
    if !path.is_dir() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}

/// Scratch directory for captures. Shared memory avoids SD card wear.
pub fn default_images_dir(use_tmp: bool) -> PathBuf {
    if use_tmp {
        std::env::temp_dir().join(env!("CARGO_PKG_NAME"))
    } else {
        PathBuf::from("/dev/shm").join(env!("CARGO_PKG_NAME"))
    }
}

#[derive(Debug, Clone)]
pub struct AppPaths {
    pub app_dir:     PathBuf,
    pub config_file: PathBuf,
    pub logs_dir:    PathBuf,
    pub images_dir:  PathBuf,
    pub stills_dir:  PathBuf,
    pub test_dir:    PathBuf,
}

impl AppPaths {
    pub fn new(
        app_dir:     PathBuf,
        images_dir:  Option<PathBuf>,
        config_file: Option<PathBuf>,
        use_tmp:     bool,
    ) -> Self {
        Self {
            config_file: config_file.unwrap_or_else(|| app_dir.join("eFinder.config")),
            logs_dir:    app_dir.join("logs"),
            images_dir:  images_dir.unwrap_or_else(|| default_images_dir(use_tmp)),
            stills_dir:  app_dir.join("Stills"),
            test_dir:    app_dir.join("test"),
            app_dir,
        }
    }

    pub fn capture_file(&self) -> PathBuf {
        self.images_dir.join("capture.jpg")
    }

    pub fn create_dirs(&self) -> anyhow::Result<()> {
        create_path(&self.app_dir)?;
        create_path(&self.images_dir)?;
        create_path(&self.stills_dir)?;
        Ok(())
    }
}

#[test]
fn test_app_paths() {
    let paths = AppPaths::new(PathBuf::from("/home/pi/.efinder"), None, None, true);
    assert_eq!(paths.config_file, PathBuf::from("/home/pi/.efinder/eFinder.config"));
    assert_eq!(paths.test_dir, PathBuf::from("/home/pi/.efinder/test"));
    assert_eq!(paths.capture_file(), std::env::temp_dir().join("efinder").join("capture.jpg"));

    let paths = AppPaths::new(
        PathBuf::from("/home/pi/.efinder"),
        Some(PathBuf::from("/mnt/images")),
        Some(PathBuf::from("/etc/efinder.config")),
        false
    );
    assert_eq!(paths.capture_file(), PathBuf::from("/mnt/images/capture.jpg"));
    assert_eq!(paths.config_file, PathBuf::from("/etc/efinder.config"));
}
