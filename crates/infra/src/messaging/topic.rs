//! `{placeholder}` topic templates.

use super::error::BrokerError;

/// Substitute every `{name}` in `template` with its value from `values`.
///
/// Values must be single, non-empty topic levels: no `/` and no MQTT
/// wildcards. A placeholder without a value is an error; an unclosed `{` is
/// kept literally.
pub fn render_topic(template: &str, values: &[(&str, &str)]) -> Result<String, BrokerError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        let Some(close) = rest[open..].find('}').map(|i| open + i) else {
            break;
        };
        out.push_str(&rest[..open]);
        let name = &rest[open + 1..close];
        let value = values
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| *value)
            .ok_or_else(|| {
                BrokerError::Topic(format!("no value for '{{{name}}}' in '{template}'"))
            })?;
        check_level(name, value)?;
        out.push_str(value);
        rest = &rest[close + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

fn check_level(name: &str, value: &str) -> Result<(), BrokerError> {
    if value.is_empty() {
        return Err(BrokerError::Topic(format!("'{name}' must not be empty")));
    }
    if value.contains(['/', '+', '#']) {
        return Err(BrokerError::Topic(format!(
            "'{name}' must be a single topic level, got '{value}'"
        )));
    }
    Ok(())
}
