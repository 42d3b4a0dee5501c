use std::{io::Read, path::Path, process::*, time::{Duration, Instant}};
use itertools::Itertools;
use once_cell::sync::OnceCell;

use crate::image::simple_fits::*;
use super::*;

pub struct AstrometryPlateSolver {
    config: PlateSolveConfig,
}

impl AstrometryPlateSolver {
    pub fn new(config: PlateSolveConfig) -> Self {
        Self { config }
    }

    fn build_command(&self, offset_mode: bool) -> Command {
        let config = &self.config;
        let mut cmd = Command::new(&config.program);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        // named star annotation is only printed while plotting
        if !offset_mode {
            cmd.arg("--no-plots");
        }
        cmd
            .arg("--overwrite")
            .arg("--skip-solved")
            .arg("--cpulimit").arg(config.cpu_limit.to_string())
            .arg("--downsample").arg(config.downsample.to_string())
            .arg("--no-remove-lines")
            .arg("--uniformize").arg("0")
            .arg("--scale-units").arg("arcsecperpix")
            .arg("--scale-low").arg(format!("{}", config.pix_scale * (1.0 - config.scale_margin)))
            .arg("--scale-high").arg(format!("{}", config.pix_scale * (1.0 + config.scale_margin)))
            .arg("--new-fits").arg("none")
            .arg("--solved").arg("none")
            .arg("--rdls").arg("none")
            .arg("--match").arg("none")
            .arg("--corr").arg("none")
            .arg(&config.image_file);
        cmd
    }

    fn exec_solve_field(&self, offset_mode: bool) -> Result<String> {
        let mut cmd = self.build_command(offset_mode);
        log::debug!(
            "Running {} {}",
            self.config.program,
            cmd.get_args().map(|arg| arg.to_string_lossy()).join(" ")
        );
        let mut child = cmd.spawn().map_err(|source| Error::Launch {
            program: self.config.program.clone(),
            source,
        })?;

        // pipes are drained concurrently so chatty solver never blocks on them
        let stdout_reader = child.stdout.take().map(Self::spawn_pipe_reader);
        let stderr_reader = child.stderr.take().map(Self::spawn_pipe_reader);

        let time_limit = self.config.wall_time_limit();
        let start_time = Instant::now();
        let exit_status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {},
                Err(source) => return Err(Error::Launch {
                    program: self.config.program.clone(),
                    source,
                }),
            }
            if start_time.elapsed() > time_limit {
                _ = child.kill();
                _ = child.wait();
                return Err(Error::Timeout {
                    program: self.config.program.clone(),
                    seconds: time_limit.as_secs(),
                });
            }
            std::thread::sleep(Duration::from_millis(50));
        };

        let join = |reader: Option<std::thread::JoinHandle<String>>| {
            reader.and_then(|r| r.join().ok()).unwrap_or_default()
        };
        let stdout = join(stdout_reader);
        let stderr = join(stderr_reader);

        if !exit_status.success() {
            return Err(Error::Exited {
                program: self.config.program.clone(),
                code: exit_status.code().unwrap_or_default(),
                stderr,
            });
        }
        log::debug!("Platesolver stdout:\n{}", stdout);
        Ok(stdout)
    }

    fn spawn_pipe_reader<R: Read + Send + 'static>(mut pipe: R) -> std::thread::JoinHandle<String> {
        std::thread::spawn(move || {
            let mut result = String::new();
            _ = pipe.read_to_string(&mut result);
            result
        })
    }

    /// Builds result from solver stdout and files it left next to image
    fn collect_result(
        &self,
        stdout:          &str,
        offset_mode:     bool,
        elapsed_seconds: f64,
    ) -> Result<SolveResult> {
        let (solved, mut star_name) = parse_solver_output(stdout, offset_mode);
        if !solved {
            return Ok(SolveResult { solved, elapsed_seconds, ..Default::default() });
        }

        let wcs = WcsTan::from_file(&self.config.image_file.with_extension("wcs"))?;

        let mut matched_pixel_xy = None;
        if star_name.is_some() {
            let axy_file = self.config.image_file.with_extension("axy");
            match read_first_source(&axy_file) {
                Ok(pixel) => matched_pixel_xy = Some(pixel),
                Err(err) => {
                    log::warn!("Can't read source table {:?}: {}", axy_file, err);
                    star_name = None;
                }
            }
        }

        Ok(SolveResult {
            solved,
            matched_pixel_xy,
            matched_star_name: star_name,
            elapsed_seconds,
            wcs: Some(wcs),
        })
    }
}

impl PlateSolverIface for AstrometryPlateSolver {
    fn solve(&mut self, offset_mode: bool) -> Result<SolveResult> {
        let start_time = Instant::now();
        let stdout = self.exec_solve_field(offset_mode)?;
        let elapsed_seconds = start_time.elapsed().as_secs_f64();
        log::debug!("Platesolver time = {:.2}s", elapsed_seconds);
        self.collect_result(&stdout, offset_mode, elapsed_seconds)
    }
}

/// Returns solved flag and name of star solver annotated (offset mode only)
fn parse_solver_output(stdout: &str, offset_mode: bool) -> (bool, Option<String>) {
    let solved = stdout.contains("solved");
    if !solved || !offset_mode {
        return (solved, None);
    }
    static STAR_RE: OnceCell<regex::Regex> = OnceCell::new();
    let star_re = STAR_RE.get_or_init(|| {
        regex::Regex::new(r"(?m)^  The star (\S+)").unwrap()
    });
    let star_name = star_re.captures(stdout)
        .map(|res| res[1].to_string());
    (solved, star_name)
}

/// Pixel of first (brightest) source in `.axy` table
fn read_first_source(path: &Path) -> std::io::Result<(f64, f64)> {
    use std::io::{Error, ErrorKind};
    let mut file = std::fs::File::open(path)?;
    let reader = FitsReader::new(&mut file)?;
    let table = reader.headers.iter()
        .find(|hdr| hdr.is_bintable())
        .ok_or_else(|| Error::new(ErrorKind::InvalidData, "No BINTABLE"))?;
    let columns = table.table_columns()?;
    let col_idx = |name: &str| columns.iter()
        .position(|col| col.name.eq_ignore_ascii_case(name))
        .ok_or_else(|| Error::new(ErrorKind::InvalidData, format!("No {} column", name)));
    let x_idx = col_idx("X")?;
    let y_idx = col_idx("Y")?;
    let row = FitsReader::read_table_row(table, &mut file, 0)?;
    Ok((row[x_idx], row[y_idx]))
}

#[test]
fn test_parse_solver_output() {
    let solved_text = "\
Field 1: solved with index index-4110.fits.
Field center: (RA,Dec) = (250.4235, 36.4613) deg.
  The star Polaris (Polaris)
  The star Kochab (Kochab)
";
    assert_eq!(parse_solver_output(solved_text, false), (true, None));
    assert_eq!(parse_solver_output(solved_text, true), (true, Some("Polaris".to_string())));

    let failed_text = "Field 1 did not solve (index index-4110.fits).\n";
    assert_eq!(parse_solver_output(failed_text, true), (false, None));
    assert_eq!(parse_solver_output("", false), (false, None));

    let no_star = "Field 1: solved with index index-4110.fits.\n";
    assert_eq!(parse_solver_output(no_star, true), (true, None));
}

#[test]
fn test_build_command() {
    let solver = AstrometryPlateSolver::new(PlateSolveConfig {
        image_file: "/tmp/capture.jpg".into(),
        ..Default::default()
    });
    let args = |offset_mode| solver.build_command(offset_mode)
        .get_args()
        .map(|a| a.to_string_lossy().to_string())
        .collect::<Vec<_>>();

    let args_normal = args(false);
    assert_eq!(args_normal[0], "--no-plots");
    assert_eq!(args_normal.last().map(String::as_str), Some("/tmp/capture.jpg"));
    let value_of = |args: &[String], key: &str| {
        let pos = args.iter().position(|a| a == key).unwrap();
        args[pos + 1].clone()
    };
    assert_eq!(value_of(&args_normal, "--cpulimit"), "5");
    assert_eq!(value_of(&args_normal, "--downsample"), "2");
    assert_eq!(value_of(&args_normal, "--scale-units"), "arcsecperpix");
    assert!(f64::abs(value_of(&args_normal, "--scale-low").parse::<f64>().unwrap() - 13.5) < 1e-9);
    assert!(f64::abs(value_of(&args_normal, "--scale-high").parse::<f64>().unwrap() - 16.5) < 1e-9);

    let args_offset = args(true);
    assert!(!args_offset.iter().any(|a| a == "--no-plots"));
    assert_eq!(args_offset.len() + 1, args_normal.len());
}

#[cfg(test)]
fn test_solver_in_temp_dir(name: &str) -> (AstrometryPlateSolver, std::path::PathBuf) {
    let dir = std::env::temp_dir().join(format!("efinder_solver_{}_{}", name, std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let solver = AstrometryPlateSolver::new(PlateSolveConfig {
        image_file: dir.join("capture.jpg"),
        ..Default::default()
    });
    (solver, dir)
}

#[cfg(test)]
fn write_axy(path: &Path, data: &[f64]) {
    let mut file = std::fs::File::create(path).unwrap();
    let writer = FitsWriter::new();
    let mut main_header = Header::new();
    main_header.set_bool("SIMPLE", true);
    main_header.set_i64("BITPIX", 8);
    main_header.set_i64("NAXIS", 0);
    writer.write_header(&mut file, &main_header).unwrap();
    let cols = [
        FitsTableCol { name: "X", type_: "1D", unit: "pix" },
        FitsTableCol { name: "Y", type_: "1D", unit: "pix" },
        FitsTableCol { name: "FLUX", type_: "1D", unit: "unknown" },
    ];
    writer.write_header_and_bintable_f64(&mut file, &Header::new(), &cols, data).unwrap();
}

#[test]
fn test_collect_result_offset_mode() {
    let (solver, dir) = test_solver_in_temp_dir("offset");
    let wcs = WcsTan {
        crpix: (640.5, 480.5),
        crval: (37.95, 89.26),
        cd: [[-15.0 / 3600.0, 0.0], [0.0, 15.0 / 3600.0]],
    };
    wcs.write_to_file(&dir.join("capture.wcs")).unwrap();
    write_axy(&dir.join("capture.axy"), &[702.5, 415.0, 9000.0, 100.0, 100.0, 50.0]);

    let stdout = "Field 1: solved with index index-4107.fits.\n  The star Polaris (Polaris)\n";
    let result = solver.collect_result(stdout, true, 1.5).unwrap();
    assert!(result.solved);
    assert_eq!(result.matched_star_name.as_deref(), Some("Polaris"));
    assert_eq!(result.matched_pixel_xy, Some((702.5, 415.0)));
    assert_eq!(result.wcs, Some(wcs));
    assert_eq!(result.elapsed_seconds, 1.5);

    // broken source table means no star identified, not failed solve
    std::fs::write(dir.join("capture.axy"), b"garbage").unwrap();
    let result = solver.collect_result(stdout, true, 1.5).unwrap();
    assert!(result.solved);
    assert!(result.matched_star_name.is_none());
    assert!(result.matched_pixel_xy.is_none());

    _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_collect_result_not_solved() {
    let (solver, dir) = test_solver_in_temp_dir("failed");
    let result = solver.collect_result("Field 1 did not solve.\n", false, 3.0).unwrap();
    assert!(!result.solved);
    assert!(result.wcs.is_none());

    // solved marker without WCS file is tooling error
    let result = solver.collect_result("Field 1: solved with index x.\n", false, 3.0);
    assert!(matches!(result, Err(Error::Wcs { .. })));
    _ = std::fs::remove_dir_all(&dir);
}

#[cfg(test)]
fn solver_with_script(name: &str, script: &str, wall_margin: Duration) -> (AstrometryPlateSolver, std::path::PathBuf) {
    use std::os::unix::fs::PermissionsExt;
    let (mut solver, dir) = test_solver_in_temp_dir(name);
    let program = dir.join("fake-solve-field.sh");
    std::fs::write(&program, script).unwrap();
    std::fs::set_permissions(&program, std::fs::Permissions::from_mode(0o755)).unwrap();
    solver.config.program = program.to_string_lossy().to_string();
    solver.config.cpu_limit = 0;
    solver.config.wall_margin = wall_margin;
    (solver, dir)
}

/// Retries while freshly written script is still busy for exec in other test thread
#[cfg(test)]
fn solve_with_retry(solver: &mut AstrometryPlateSolver) -> Result<SolveResult> {
    let mut attempts = 0;
    loop {
        let result = solver.solve(false);
        match &result {
            Err(Error::Launch { source, .. })
            if source.raw_os_error() == Some(26) && attempts < 10 => {
                attempts += 1;
                std::thread::sleep(Duration::from_millis(20));
            }
            _ => return result,
        }
    }
}

#[test]
fn test_solver_launch_failure() {
    let (mut solver, dir) = test_solver_in_temp_dir("launch");
    solver.config.program = "/nonexistent/efinder/solve-field".to_string();
    let result = solver.solve(false);
    assert!(matches!(
        result,
        Err(Error::Launch { ref program, .. }) if program == "/nonexistent/efinder/solve-field"
    ));
    _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_solver_nonzero_exit() {
    let (mut solver, dir) = solver_with_script(
        "exit",
        "#!/bin/sh\necho 'index files missing' >&2\nexit 3\n",
        Duration::from_secs(10),
    );
    match solve_with_retry(&mut solver) {
        Err(Error::Exited { code, stderr, .. }) => {
            assert_eq!(code, 3);
            assert!(stderr.contains("index files missing"));
        }
        other => panic!("unexpected result {:?}", other.map(|r| r.solved)),
    }
    _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_solver_killed_after_wall_time() {
    let (mut solver, dir) = solver_with_script(
        "timeout",
        "#!/bin/sh\nexec sleep 30\n",
        Duration::from_millis(300),
    );
    let start = Instant::now();
    let result = solve_with_retry(&mut solver);
    assert!(matches!(result, Err(Error::Timeout { .. })));
    assert!(start.elapsed() < Duration::from_secs(10));
    _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_solver_not_solved_output() {
    let (mut solver, dir) = solver_with_script(
        "nosolve",
        "#!/bin/sh\necho 'Field 1 did not solve (index index-4110.fits).'\n",
        Duration::from_secs(10),
    );
    let result = solve_with_retry(&mut solver).unwrap();
    assert!(!result.solved);
    assert!(result.wcs.is_none());
    _ = std::fs::remove_dir_all(&dir);
}
