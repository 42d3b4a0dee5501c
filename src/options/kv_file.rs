//! Line oriented `key:value` text. Key ends at first colon,
//! so values may contain colons.

pub fn parse_kv_text(text: &str) -> Vec<(String, String)> {
    text.lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let result = line.split_once(':');
            if result.is_none() {
                log::warn!("Config line without colon ignored: {}", line);
            }
            result
        })
        .map(|(key, value)| (key.trim().to_string(), value.to_string()))
        .collect()
}

pub fn write_kv_text(pairs: &[(String, String)]) -> String {
    let mut result = String::new();
    for (key, value) in pairs {
        result.push_str(key);
        result.push(':');
        result.push_str(value);
        result.push('\n');
    }
    result
}

#[test]
fn test_parse_kv_text() {
    let pairs = parse_kv_text("Exposure:1\r\n\nbroken line\nCamera Command:a:b\n");
    assert_eq!(pairs, vec![
        ("Exposure".to_string(), "1".to_string()),
        ("Camera Command".to_string(), "a:b".to_string()),
    ]);
    assert_eq!(write_kv_text(&pairs), "Exposure:1\nCamera Command:a:b\n");
}
