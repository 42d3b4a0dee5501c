use std::io::Write;

/// Three line output of handpad box
pub trait Display: Send {
    fn display(&mut self, line0: &str, line1: &str, line2: &str);
}

/// USB handpad box. Lines are sent as `<n>:<text>\n`.
pub struct HandpadBoxDisplay {
    port: Box<dyn Write + Send>,
}

impl HandpadBoxDisplay {
    pub fn new(port: Box<dyn Write + Send>) -> Self {
        Self { port }
    }

    fn write_lines(&mut self, lines: [&str; 3]) -> std::io::Result<()> {
        for (idx, line) in lines.iter().enumerate() {
            writeln!(self.port, "{}:{}", idx, line)?;
        }
        self.port.flush()
    }
}

impl Display for HandpadBoxDisplay {
    fn display(&mut self, line0: &str, line1: &str, line2: &str) {
        log::debug!("display: {} | {} | {}", line0, line1, line2);
        if let Err(err) = self.write_lines([line0, line1, line2]) {
            log::error!("Can't write to handpad box: {}", err);
        }
    }
}

/// Used when no handpad box is attached
pub struct LogDisplay;

impl Display for LogDisplay {
    fn display(&mut self, line0: &str, line1: &str, line2: &str) {
        log::info!("display: {} | {} | {}", line0, line1, line2);
    }
}

#[cfg(test)]
#[derive(Clone, Default)]
pub struct SharedBuf(pub std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

#[cfg(test)]
impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
fn test_handpad_box_format() {
    let buf = SharedBuf::default();
    let mut display = HandpadBoxDisplay::new(Box::new(buf.clone()));
    display.display("Delta: x=  1.25", "       y= -0.50", "time: 2.31 s");
    let text = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
    assert_eq!(text, "0:Delta: x=  1.25\n1:       y= -0.50\n2:time: 2.31 s\n");
}
