//! Date/time tool: current wall-clock time in an IANA timezone.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use chrono_tz::Tz;
use serde_json::{Value, json};
use skillrun_core::error::ToolError;
use skillrun_core::tool::{Tool, ToolContext};

pub struct DateTimeTool {
    default_timezone: Tz,
}

impl DateTimeTool {
    /// `default_timezone` is used when the caller names none.
    pub fn new(default_timezone: Tz) -> Self {
        Self { default_timezone }
    }

    fn describe(now: DateTime<Tz>, label: &str) -> Value {
        json!({
            "date": now.format("%Y-%m-%d").to_string(),
            "time": now.format("%H:%M:%S").to_string(),
            "datetime": now.format("%Y-%m-%d %H:%M:%S").to_string(),
            "timezone": label,
            "iso_format": now.to_rfc3339(),
            "weekday": now.format("%A").to_string(),
            "day_of_year": now.ordinal(),
        })
    }
}

impl Default for DateTimeTool {
    fn default() -> Self {
        Self::new(Tz::UTC)
    }
}

#[async_trait]
impl Tool for DateTimeTool {
    fn name(&self) -> &str {
        "get_datetime"
    }

    fn description(&self) -> &str {
        "Get current date and time information for a specific timezone or the default timezone"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "timezone": {
                    "type": "string",
                    "description": "Timezone name (e.g., 'UTC', 'Asia/Shanghai', 'America/New_York'). Default is the configured timezone."
                }
            },
            "required": []
        })
    }

    async fn execute(&self, arguments: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let (tz, label) = match arguments["timezone"].as_str().filter(|s| !s.is_empty()) {
            Some(name) => {
                let tz: Tz = name.parse().map_err(|_| {
                    ToolError::InvalidArguments(format!(
                        "Unknown timezone: {name}. Please use IANA timezone names."
                    ))
                })?;
                (tz, name.to_string())
            }
            None => (self.default_timezone, self.default_timezone.name().to_string()),
        };

        Ok(Self::describe(Utc::now().with_timezone(&tz), &label))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn describe_formats_fields() {
        let tz: Tz = "Asia/Shanghai".parse().unwrap();
        let now = tz.with_ymd_and_hms(2024, 2, 3, 4, 5, 6).unwrap();
        let value = DateTimeTool::describe(now, "Asia/Shanghai");

        assert_eq!(value["date"], "2024-02-03");
        assert_eq!(value["time"], "04:05:06");
        assert_eq!(value["datetime"], "2024-02-03 04:05:06");
        assert_eq!(value["weekday"], "Saturday");
        assert_eq!(value["day_of_year"], 34);
        assert_eq!(value["iso_format"], "2024-02-03T04:05:06+08:00");
    }

    #[tokio::test]
    async fn uses_default_timezone() {
        let tool = DateTimeTool::new("Europe/Paris".parse().unwrap());
        let value = tool.execute(json!({}), &ToolContext::new()).await.unwrap();
        assert_eq!(value["timezone"], "Europe/Paris");
    }

    #[tokio::test]
    async fn unknown_timezone_is_invalid_arguments() {
        let err = DateTimeTool::default()
            .execute(json!({"timezone": "Mars/Olympus"}), &ToolContext::new())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ToolError::InvalidArguments("Unknown timezone: Mars/Olympus. Please use IANA timezone names.".into())
        );
    }
}
