use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use crate::descriptor::{HandlerContext, ToolDescriptor, ToolHandler, ToolOrigin};
use crate::error::Result;

const DEFAULT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn descriptor() -> ToolDescriptor {
    ToolDescriptor::new(
        "get_current_time",
        "Gibt die aktuelle Uhrzeit zurueck. Kann eine Zeitzone und ein Format angeben.",
        json!({
            "type": "object",
            "properties": {
                "timezone": {
                    "type": "string",
                    "description": "Zeitzone, z.B. 'Europe/Berlin', 'UTC', 'US/Eastern'",
                    "default": "Europe/Berlin"
                },
                "format": {
                    "type": "string",
                    "description": "Zeitformat, z.B. '%H:%M:%S', '%Y-%m-%d %H:%M:%S'",
                    "default": DEFAULT_FORMAT
                }
            },
            "required": []
        }),
        Arc::new(TimeHandler),
        ToolOrigin::Builtin,
    )
}

struct TimeHandler;

#[async_trait]
impl ToolHandler for TimeHandler {
    async fn call(&self, args: Value, _ctx: &HandlerContext) -> Result<Value> {
        let timezone = args
            .get("timezone")
            .and_then(Value::as_str)
            .unwrap_or("Europe/Berlin");
        let format = args
            .get("format")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_FORMAT);

        let tz: chrono_tz::Tz = timezone.parse().unwrap_or(chrono_tz::UTC);
        let now = Utc::now().with_timezone(&tz);

        // An invalid strftime string would abort Display mid-write; fall
        // back to the default format instead.
        let format = if format_is_valid(format) {
            format
        } else {
            DEFAULT_FORMAT
        };

        Ok(json!({
            "time": now.format(format).to_string(),
            "timezone": timezone,
            "iso": now.to_rfc3339(),
        }))
    }
}

fn format_is_valid(format: &str) -> bool {
    use chrono::format::{Item, StrftimeItems};
    !StrftimeItems::new(format).any(|item| matches!(item, Item::Error))
}
