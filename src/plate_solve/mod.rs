use std::path::PathBuf;

use crate::sky_math::{math::*, sexagesimal::*};

mod astrometry;
mod wcs;

pub use astrometry::AstrometryPlateSolver;
pub use wcs::WcsTan;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Can't launch {program}: {source}")]
    Launch {
        program: String,
        source:  std::io::Error,
    },

    #[error("{program} didn't finish in {seconds} seconds")]
    Timeout {
        program: String,
        seconds: u64,
    },

    #[error("{program} exited with code {code}\n\n{stderr}")]
    Exited {
        program: String,
        code:    i32,
        stderr:  String,
    },

    #[error("Can't read WCS file {path:?}: {text}")]
    Wcs {
        path: PathBuf,
        text: String,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone)]
pub struct PlateSolveConfig {
    pub program:      String,
    pub image_file:   PathBuf,
    pub pix_scale:    f64, // in arcsec per pixel
    pub scale_margin: f64, // relative, 0.1 means ±10%
    pub cpu_limit:    u32, // in seconds
    pub downsample:   u32,
    pub wall_margin:  std::time::Duration, // added to wall clock limit
}

impl Default for PlateSolveConfig {
    fn default() -> Self {
        Self {
            program:      "solve-field".to_string(),
            image_file:   PathBuf::from("capture.jpg"),
            pix_scale:    15.0,
            scale_margin: 0.1,
            cpu_limit:    5,
            downsample:   2,
            wall_margin:  std::time::Duration::from_secs(10),
        }
    }
}

impl PlateSolveConfig {
    /// Wall clock ceiling for solver process. `--cpulimit` only bounds
    /// CPU time so a stuck process is killed after this.
    pub fn wall_time_limit(&self) -> std::time::Duration {
        std::time::Duration::from_secs(4 * self.cpu_limit as u64) + self.wall_margin
    }
}

#[derive(Debug, Clone, Default)]
pub struct SolveResult {
    pub solved:            bool,
    /// Pixel of first detected source. Only in offset mode with named star.
    pub matched_pixel_xy:  Option<(f64, f64)>,
    pub matched_star_name: Option<String>,
    pub elapsed_seconds:   f64,
    pub wcs:               Option<WcsTan>,
}

impl SolveResult {
    pub fn print_to_log(&self) {
        if !self.solved {
            log::info!("Plate solver found no solution ({:.2}s)", self.elapsed_seconds);
            return;
        }
        if let Some(wcs) = &self.wcs {
            let center = wcs.pixel_to_sky(FRAME_CENTER.0, FRAME_CENTER.1);
            log::info!(
                "Solved in {:.2}s, frame center j2000 = (ra: {}, dec: {})",
                self.elapsed_seconds,
                degrees_to_sexagesimal(center.ra, false, DelimiterStyle::Colon),
                degrees_to_sexagesimal(center.dec, true, DelimiterStyle::Colon),
            );
        }
        if let Some(name) = &self.matched_star_name {
            log::info!("Solver identified star {} at {:?}", name, self.matched_pixel_xy);
        }
    }
}

pub trait PlateSolverIface {
    fn solve(&mut self, offset_mode: bool) -> Result<SolveResult>;
}

pub struct PlateSolver {
    solver: Box<dyn PlateSolverIface + Send + 'static>,
}

impl PlateSolver {
    pub fn new(config: PlateSolveConfig) -> Self {
        Self {
            solver: Box::new(AstrometryPlateSolver::new(config)),
        }
    }

    #[cfg(test)]
    pub fn with_solver(solver: Box<dyn PlateSolverIface + Send + 'static>) -> Self {
        Self { solver }
    }

    pub fn solve(&mut self, offset_mode: bool) -> Result<SolveResult> {
        log::debug!("Starting platesolve (offset_mode={}) ...", offset_mode);
        let result = self.solver.solve(offset_mode);
        match &result {
            Ok(result) => result.print_to_log(),
            Err(err)   => log::error!("Plate solver failed: {}", err),
        }
        result
    }
}
