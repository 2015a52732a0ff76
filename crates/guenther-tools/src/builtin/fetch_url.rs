use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::descriptor::{HandlerContext, ToolDescriptor, ToolHandler, ToolOrigin};
use crate::error::Result;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/120.0 Safari/537.36";
const MAX_CONTENT_CHARS: usize = 50_000;

pub fn descriptor() -> ToolDescriptor {
    ToolDescriptor::new(
        "fetch_url",
        "Laedt den Inhalt einer Webseite oder URL herunter und gibt ihn als Text zurueck.",
        json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "Vollstaendige URL inkl. https://, z.B. 'https://example.com'"
                }
            },
            "required": ["url"]
        }),
        Arc::new(FetchUrlHandler),
        ToolOrigin::Builtin,
    )
    .with_usage("Rufe dieses Tool mit url=<vollstaendige URL> auf.\nBeispiel: {\"url\": \"https://example.com\"}")
}

struct FetchUrlHandler;

#[async_trait]
impl ToolHandler for FetchUrlHandler {
    async fn call(&self, args: Value, ctx: &HandlerContext) -> Result<Value> {
        let url = args.get("url").and_then(Value::as_str).unwrap_or("").trim();
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Ok(json!({ "error": "URL muss mit http:// oder https:// beginnen" }));
        }

        let response = match ctx
            .http
            .get(url)
            .header("User-Agent", USER_AGENT)
            .timeout(Duration::from_secs(30))
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => return Ok(json!({ "error": e.to_string(), "url": url })),
        };

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        let body = response.text().await.unwrap_or_default();
        let truncated = body.len() > MAX_CONTENT_CHARS;
        let mut content: String = body.chars().take(MAX_CONTENT_CHARS).collect();
        if truncated {
            content.push_str("\n…[gekürzt]");
        }

        Ok(json!({
            "url": url,
            "status": status,
            "content_type": content_type,
            "content": content,
        }))
    }
}
