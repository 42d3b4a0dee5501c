use chrono::NaiveDateTime;

use crate::sky_math::{math::*, sexagesimal::*};
use super::{error::*, transport::*};

/// Reply of `:GW#` command, e.g. `AT2`: alt-az mount, tracking, 2 star alignment
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AlignStatus(pub String);

impl AlignStatus {
    pub fn stars(&self) -> Option<u32> {
        self.0.chars().nth(2)?.to_digit(10)
    }

    pub fn is_aligned(&self) -> bool {
        self.stars().map(|s| s >= 2).unwrap_or(false)
    }

    pub fn short_text(&self) -> &str {
        self.0.get(..3).unwrap_or(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObserverInfo {
    pub location: ObserverLocation,
    pub utc_time: NaiveDateTime,
}

/// Session with Nexus DSC using LX200 command subset
pub struct Nexus {
    transport: Option<Box<dyn Transport>>,
}

impl Nexus {
    /// Probes USB serial link and WiFi bridge
    pub fn connect() -> Self {
        Self::connect_to(SERIAL_DEVICE, TCP_ADDRESS)
    }

    pub fn connect_to(serial_device: &str, tcp_address: &str) -> Self {
        match probe_transports(serial_device, tcp_address) {
            Some(transport) => Self::with_transport(transport),
            None => {
                log::warn!("No USB or WiFi link to Nexus");
                Self::disconnected()
            }
        }
    }

    pub fn with_transport(transport: Box<dyn Transport>) -> Self {
        Self { transport: Some(transport) }
    }

    pub fn disconnected() -> Self {
        Self { transport: None }
    }

    pub fn link_mode(&self) -> LinkMode {
        self.transport.as_ref()
            .map(|t| t.link_mode())
            .unwrap_or(LinkMode::None)
    }

    fn transport(&mut self) -> Result<&mut Box<dyn Transport>> {
        self.transport.as_mut().ok_or(Error::NotConnected)
    }

    pub fn get(&mut self, cmd: &str) -> Result<String> {
        let result = self.transport()?.get(cmd);
        match &result {
            Ok(reply) => log::debug!("sent {} got {}", cmd, reply),
            Err(err)  => log::error!("sent {} failed: {}", cmd, err),
        }
        result
    }

    pub fn write(&mut self, cmd: &str) -> Result<()> {
        let result = self.transport()?.write(cmd);
        match &result {
            Ok(())   => log::debug!("sent {}", cmd),
            Err(err) => log::error!("sent {} failed: {}", cmd, err),
        }
        result
    }

    fn get_value(&mut self, cmd: &str) -> Result<f64> {
        let reply = self.get(cmd)?;
        sexagesimal_to_value(&reply)
            .ok_or_else(|| Error::MalformedReply(cmd.to_string(), reply))
    }

    /// Observer location (east positive longitude) and current UTC time
    pub fn read_observer_info(&mut self) -> Result<ObserverInfo> {
        let latitude = self.get_value(":Gt#")?;
        // LX200 longitude is west positive
        let longitude = -self.get_value(":Gg#")?;

        let local_time = self.get(":GL#")?;
        let local_date = self.get(":GC#")?;
        let utc_offset_str = self.get(":GG#")?;
        log::info!(
            "Nexus reports local datetime {} {}, UTC offset {}",
            local_date, local_time, utc_offset_str
        );
        let utc_offset = utc_offset_str.trim().parse::<f64>()
            .map_err(|_| Error::MalformedReply(":GG#".to_string(), utc_offset_str.clone()))?;
        let local_dt = NaiveDateTime::parse_from_str(
            &format!("{} {}", local_date.trim(), local_time.trim()),
            "%m/%d/%y %H:%M:%S"
        ).map_err(|_| Error::MalformedReply(
            ":GC#".to_string(),
            format!("{} {}", local_date, local_time)
        ))?;
        let utc_time = local_dt + chrono::Duration::milliseconds((utc_offset * 3_600_000.0) as i64);
        log::info!("Calculated UTC {}", utc_time);

        Ok(ObserverInfo {
            location: ObserverLocation { latitude, longitude },
            utc_time,
        })
    }

    /// Where mount thinks it points and its alignment status
    pub fn read_pointing(&mut self) -> Result<(EqCoord<JNow>, AlignStatus)> {
        let ra = self.get_value(":GR#")?;
        let dec = self.get_value(":GD#")?;
        let crd = EqCoord::new(ra, dec);
        log::info!(
            "Nexus RA: {} Dec: {}",
            degrees_to_sexagesimal(crd.ra, false, DelimiterStyle::Colon),
            degrees_to_sexagesimal(crd.dec, true, DelimiterStyle::Colon)
        );
        let status = self.query_alignment_status()?;
        Ok((crd, status))
    }

    pub fn query_alignment_status(&mut self) -> Result<AlignStatus> {
        self.get(":GW#").map(AlignStatus)
    }

    /// Sets sync position. Returns `false` when mount rejects any coordinate.
    pub fn send_alignment(&mut self, ra: &str, dec: &str) -> Result<bool> {
        if self.get(&format!(":Sr{}#", ra))? == "0" {
            log::info!("Invalid position RA {}", ra);
            return Ok(false);
        }
        if self.get(&format!(":Sd{}#", dec))? == "0" {
            log::info!("Invalid position Dec {}", dec);
            return Ok(false);
        }
        Ok(true)
    }

    pub fn commit_sync(&mut self) -> Result<String> {
        self.get(":CM#")
    }

    /// GoTo target selected on mount. `None` if no target was set (`00:00` placeholder).
    pub fn read_goto_target(&mut self) -> Result<Option<(String, String)>> {
        let ra = self.get(":Gr#")?;
        if ra.get(0..2) == Some("00") && ra.get(3..5) == Some("00") {
            log::info!("No GoTo target");
            return Ok(None);
        }
        let dec = self.get(":Gd#")?;
        log::info!("Target GoTo RA {} Dec {}", ra, dec);
        Ok(Some((ra, dec)))
    }

    pub fn set_target_and_slew(&mut self, ra: &str, dec: &str) -> Result<String> {
        self.write(&format!(":Sr{}#", ra))?;
        self.write(&format!(":Sd{}#", dec))?;
        self.get(":MS#")
    }
}

/// Pointing as short text for capture file names, e.g. `164142+362741`
pub fn short_label(crd: Option<&EqCoord<JNow>>) -> String {
    let Some(crd) = crd else {
        return "no_RADec".to_string();
    };
    let ra = degrees_to_sexagesimal(crd.ra, false, DelimiterStyle::Colon);
    let dec = degrees_to_sexagesimal(crd.dec, true, DelimiterStyle::Colon);
    format!("{}{}", ra.replace(':', ""), dec.replace(':', ""))
}

/// Sets host clock. Requires sudo rights without password.
pub fn set_system_clock(utc_time: &NaiveDateTime) -> anyhow::Result<()> {
    let time_str = format!("{}Z", utc_time.format("%Y-%m-%d %H:%M:%S%.3f"));
    log::info!("Setting system clock to {}", time_str);
    let status = std::process::Command::new("sudo")
        .args(["date", "-u", "--set", &time_str])
        .status()?;
    if !status.success() {
        anyhow::bail!("date exited with code {}", status.code().unwrap_or_default());
    }
    Ok(())
}

#[cfg(test)]
fn scripted_nexus(replies: &[(&str, &str)]) -> (Nexus, std::sync::Arc<std::sync::Mutex<Vec<String>>>) {
    let transport = ScriptedTransport::new(replies);
    let sent = transport.sent.clone();
    (Nexus::with_transport(Box::new(transport)), sent)
}

#[test]
fn test_read_observer_info() {
    let (mut nexus, _) = scripted_nexus(&[
        (":Gt#", "+52*30"),
        (":Gg#", "-013*24"),
        (":GL#", "22:15:30"),
        (":GC#", "03/15/24"),
        (":GG#", "-01"),
    ]);
    let info = nexus.read_observer_info().unwrap();
    assert_eq!(info.location.latitude, 52.5);
    assert_eq!(info.location.longitude, 13.4);
    assert_eq!(info.utc_time.to_string(), "2024-03-15 21:15:30");
}

#[test]
fn test_read_observer_info_malformed() {
    let (mut nexus, _) = scripted_nexus(&[(":Gt#", "garbage")]);
    assert!(matches!(nexus.read_observer_info(), Err(Error::MalformedReply(..))));
}

#[test]
fn test_read_pointing() {
    let (mut nexus, sent) = scripted_nexus(&[
        (":GR#", "10:30:00"),
        (":GD#", "-00*30:00"),
        (":GW#", "AT2"),
    ]);
    let (crd, status) = nexus.read_pointing().unwrap();
    assert_eq!(crd.ra, 10.5);
    assert_eq!(crd.dec, -0.5);
    assert!(status.is_aligned());
    assert_eq!(*sent.lock().unwrap(), [":GR#", ":GD#", ":GW#"]);
}

#[test]
fn test_not_connected() {
    let mut nexus = Nexus::disconnected();
    assert_eq!(nexus.link_mode(), LinkMode::None);
    assert!(matches!(nexus.read_pointing(), Err(Error::NotConnected)));
    assert!(matches!(nexus.get(":GW#"), Err(Error::NotConnected)));
}

#[test]
fn test_no_link_found_means_not_connected() {
    assert!(probe_transports("/dev/efinder_no_such_tty", "127.0.0.1:1").is_none());

    let mut nexus = Nexus::connect_to("/dev/efinder_no_such_tty", "127.0.0.1:1");
    assert_eq!(nexus.link_mode(), LinkMode::None);
    assert!(matches!(nexus.read_pointing(), Err(Error::NotConnected)));
}

#[test]
fn test_align_status() {
    assert!(AlignStatus("AT2".to_string()).is_aligned());
    assert!(AlignStatus("AT3".to_string()).is_aligned());
    assert!(!AlignStatus("AT1".to_string()).is_aligned());
    assert!(!AlignStatus("AT0".to_string()).is_aligned());
    assert!(!AlignStatus(String::new()).is_aligned());
    assert_eq!(AlignStatus("AT2".to_string()).short_text(), "AT2");
}

#[test]
fn test_send_alignment_rejected() {
    let (mut nexus, sent) = scripted_nexus(&[(":Sr", "0"), (":Sd", "1")]);
    assert!(!nexus.send_alignment("10:00:00", "+20*00:00").unwrap());
    assert_eq!(*sent.lock().unwrap(), [":Sr10:00:00#"]);

    let (mut nexus, sent) = scripted_nexus(&[(":Sr", "1"), (":Sd", "0")]);
    assert!(!nexus.send_alignment("10:00:00", "+20*00:00").unwrap());
    assert_eq!(*sent.lock().unwrap(), [":Sr10:00:00#", ":Sd+20*00:00#"]);
}

#[test]
fn test_goto_target() {
    let (mut nexus, sent) = scripted_nexus(&[(":Gr#", "00:00:00")]);
    assert_eq!(nexus.read_goto_target().unwrap(), None);
    assert_eq!(*sent.lock().unwrap(), [":Gr#"]);

    let (mut nexus, _) = scripted_nexus(&[(":Gr#", "05:35:17"), (":Gd#", "-05*23:28")]);
    assert_eq!(
        nexus.read_goto_target().unwrap(),
        Some(("05:35:17".to_string(), "-05*23:28".to_string()))
    );
}

#[test]
fn test_short_label() {
    assert_eq!(short_label(None), "no_RADec");
    let crd = EqCoord::<JNow>::new(16.695, 36.461389);
    assert_eq!(short_label(Some(&crd)), "164142+362741");
}
