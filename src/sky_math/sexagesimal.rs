#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DelimiterStyle {
    /// `+DD:MM:SS` or `HH:MM:SS`
    Colon,
    /// `+DD*MM:SS`, the form the mount accepts in `:Sd` command
    Align,
    /// `DDD:MM:SS`, three digit degrees for azimuth
    Azimuth,
}

/// Converts decimal degrees (or hours) into sexagesimal text.
///
/// Seconds are truncated, not rounded: 12.99999 is displayed as
/// `12:59:59`. Known approximation of up to one second.
pub fn degrees_to_sexagesimal(value: f64, signed: bool, style: DelimiterStyle) -> String {
    let sign = match (signed, value < 0.0) {
        (true, true)  => "-",
        (true, false) => "+",
        (false, true) => "-",
        (false, false) => "",
    };
    // guard against 10.5 stored as 10.4999999999
    let total_seconds = (value.abs() * 3600.0 + 1e-6).floor() as u64;
    let degrees = total_seconds / 3600;
    let minutes = (total_seconds / 60) % 60;
    let seconds = total_seconds % 60;
    match style {
        DelimiterStyle::Colon =>
            format!("{}{:02}:{:02}:{:02}", sign, degrees, minutes, seconds),
        DelimiterStyle::Align =>
            format!("{}{:02}*{:02}:{:02}", sign, degrees, minutes, seconds),
        DelimiterStyle::Azimuth =>
            format!("{}{:03}:{:02}:{:02}", sign, degrees, minutes, seconds),
    }
}

#[test]
fn test_degrees_to_sexagesimal() {
    assert_eq!(degrees_to_sexagesimal(12.5819, true, DelimiterStyle::Colon), "+12:34:54");
    assert_eq!(degrees_to_sexagesimal(-12.5819, true, DelimiterStyle::Colon), "-12:34:54");
    assert_eq!(degrees_to_sexagesimal(-12.5819, true, DelimiterStyle::Align), "-12*34:54");
    assert_eq!(degrees_to_sexagesimal(10.5, false, DelimiterStyle::Colon), "10:30:00");
    assert_eq!(degrees_to_sexagesimal(5.0, false, DelimiterStyle::Azimuth), "005:00:00");
    assert_eq!(degrees_to_sexagesimal(0.0, true, DelimiterStyle::Align), "+00*00:00");
    assert_eq!(degrees_to_sexagesimal(-0.5, true, DelimiterStyle::Align), "-00*30:00");

    // truncated, never rounded up
    assert_eq!(degrees_to_sexagesimal(12.0 + 59.0/60.0 + 59.9/3600.0, false, DelimiterStyle::Colon), "12:59:59");
}

#[test]
fn test_align_style_asterisk_position() {
    for value in [-89.99, -12.5819, -0.01, 0.0, 7.25, 45.123, 89.5] {
        let text = degrees_to_sexagesimal(value, true, DelimiterStyle::Align);
        assert_eq!(text.as_bytes()[3], b'*', "{}", text);
        assert_eq!(text.starts_with('-'), value < 0.0, "{}", text);
    }
}

/// Parses sexagesimal text as sent by the mount (`+DD*MM:SS`, `+DD*MM'SS`,
/// `HH:MM:SS`, `sDD*MM`). Sign is taken from the degree field only and
/// applies to minutes and seconds too.
pub fn sexagesimal_to_value(text: &str) -> Option<f64> {
    use once_cell::sync::OnceCell;
    let text = text.trim().trim_end_matches('#');

    static RE: OnceCell<regex::Regex> = OnceCell::new();
    let re = RE.get_or_init(|| {
        regex::Regex::new(
            r"^([+-]?)(\d+)[:*'](\d+(?:\.\d+)?)(?:[:'](\d+(?:\.\d+)?))?$"
        ).unwrap()
    });
    let res = re.captures(text)?;
    let is_neg = &res[1] == "-";
    let degrees = res[2].parse::<f64>().ok()?;
    let minutes = res[3].parse::<f64>().ok()?;
    let seconds = match res.get(4) {
        Some(s) => s.as_str().parse::<f64>().ok()?,
        None    => 0.0,
    };
    let value = degrees + minutes / 60.0 + seconds / 3600.0;
    Some(if is_neg { -value } else { value })
}

#[test]
fn test_sexagesimal_to_value() {
    assert!(sexagesimal_to_value("").is_none());
    assert!(sexagesimal_to_value("garbage").is_none());
    assert_eq!(sexagesimal_to_value("10:30:00"), Some(10.5));
    assert_eq!(sexagesimal_to_value("10:30:00#"), Some(10.5));
    assert_eq!(sexagesimal_to_value("-05*30:00"), Some(-5.5));
    assert_eq!(sexagesimal_to_value("-00*30:00"), Some(-0.5));
    assert_eq!(sexagesimal_to_value("+20*00'00"), Some(20.0));
    assert_eq!(sexagesimal_to_value("+52*30"), Some(52.5));
    assert_eq!(sexagesimal_to_value("-002*15"), Some(-2.25));
    assert_eq!(sexagesimal_to_value("10:30:30"), Some(10.508333333333333));
}

#[test]
fn test_sexagesimal_round_trip() {
    for value in [-45.5, -0.25, 0.0, 12.75, 33.0 + 1.0/60.0 + 7.0/3600.0] {
        let text = degrees_to_sexagesimal(value, true, DelimiterStyle::Align);
        let parsed = sexagesimal_to_value(&text).unwrap();
        assert!(f64::abs(parsed - value) < 1.0/3600.0, "{} -> {}", value, text);
    }
}
