//! `kumo weather`: outdoor conditions at the active site.

use std::fmt::Write as _;

use kumo_api::models::Weather;
use kumo_core::CoreError;

use crate::cli::GlobalOpts;
use crate::config::Session;
use crate::error::CliError;
use crate::output;

fn weather_detail(site: &str, weather: &Weather) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Weather at {site}");
    for (key, value) in &weather.values {
        let value = match value {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Null => "-".into(),
            other => other.to_string(),
        };
        let _ = writeln!(out, "  {key:<18}{value}");
    }
    out.trim_end().to_owned()
}

pub async fn handle(global: &GlobalOpts) -> Result<(), CliError> {
    let session = Session::open(global)?;
    let site = session.coordinator_config(global)?.site_id;
    let weather = session
        .client
        .weather(site.as_str())
        .await
        .map_err(|e| session.auth_context(CoreError::from(e).into()))?;

    let out = output::render_single(
        global.output,
        &weather,
        |w| weather_detail(site.as_str(), w),
        |_| site.to_string(),
    );
    output::print_output(&out, global.quiet);
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn detail_lists_readings_by_key() {
        let weather: Weather = serde_json::from_value(serde_json::json!({
            "temperature": 12.5,
            "condition": "cloudy",
            "windSpeed": null
        }))
        .unwrap();
        let text = weather_detail("site-1", &weather);
        assert!(text.starts_with("Weather at site-1"));
        assert!(text.contains("condition         cloudy"));
        assert!(text.contains("temperature       12.5"));
        assert!(text.contains("windSpeed         -"));
    }
}
