//! Image operations over session blobs. The gateway stores an inbound photo
//! under `tg_<username>` before dispatch; the model then calls this tool
//! with that session key.

use std::io::Cursor;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use image::{DynamicImage, ImageFormat};
use serde_json::{json, Value};

use crate::descriptor::{HandlerContext, ToolDescriptor, ToolHandler, ToolOrigin};
use crate::error::Result;

const OPERATIONS: &[&str] = &[
    "blur",
    "grayscale",
    "rotate",
    "resize",
    "sharpen",
    "brightness",
    "contrast",
    "flip_horizontal",
    "flip_vertical",
    "invert",
];

pub fn descriptor() -> ToolDescriptor {
    ToolDescriptor::new(
        "process_image",
        "Bearbeitet ein vom Nutzer gesendetes Bild (per Session-Key) und gibt das Ergebnis zurueck.",
        json!({
            "type": "object",
            "properties": {
                "session_key": {
                    "type": "string",
                    "description": "Session-Key des empfangenen Bildes, z.B. 'tg_alice'"
                },
                "operation": {
                    "type": "string",
                    "description": "Gewuenschte Operation",
                    "enum": OPERATIONS
                },
                "param": {
                    "type": "number",
                    "description": "Optionaler Parameter: rotate=Grad (90/180/270), resize=Prozent, brightness/contrast=Staerke"
                }
            },
            "required": ["session_key", "operation"]
        }),
        Arc::new(ProcessImageHandler),
        ToolOrigin::Builtin,
    )
    .with_usage(
        "Beispiel: {\"session_key\": \"tg_alice\", \"operation\": \"grayscale\"}\n\
         Mit Parameter: {\"session_key\": \"tg_alice\", \"operation\": \"rotate\", \"param\": 180}",
    )
}

struct ProcessImageHandler;

#[async_trait]
impl ToolHandler for ProcessImageHandler {
    async fn call(&self, args: Value, ctx: &HandlerContext) -> Result<Value> {
        let session_key = args
            .get("session_key")
            .and_then(Value::as_str)
            .unwrap_or("");
        let operation = args.get("operation").and_then(Value::as_str).unwrap_or("");
        let param = args.get("param").and_then(Value::as_f64);

        let Some(blob) = ctx.blobs.get(session_key) else {
            return Ok(json!({
                "error": format!("Kein Bild unter Session-Key '{session_key}' gefunden")
            }));
        };

        let bytes = match base64::engine::general_purpose::STANDARD.decode(&blob.b64) {
            Ok(b) => b,
            Err(e) => return Ok(json!({ "error": format!("Bild-Base64 ungueltig: {e}") })),
        };
        let img = match image::load_from_memory(&bytes) {
            Ok(i) => i,
            Err(e) => return Ok(json!({ "error": format!("Bild nicht lesbar: {e}") })),
        };

        let processed = match apply_operation(img, operation, param) {
            Ok(i) => i,
            Err(e) => return Ok(json!({ "error": e })),
        };

        let mut out = Cursor::new(Vec::new());
        if let Err(e) = processed.write_to(&mut out, ImageFormat::Png) {
            return Ok(json!({ "error": format!("PNG-Encoding fehlgeschlagen: {e}") }));
        }

        Ok(json!({
            "image_base64": base64::engine::general_purpose::STANDARD.encode(out.get_ref()),
            "mime_type": "image/png",
            "operation": operation,
            "width": processed.width(),
            "height": processed.height(),
        }))
    }
}

fn apply_operation(
    img: DynamicImage,
    operation: &str,
    param: Option<f64>,
) -> std::result::Result<DynamicImage, String> {
    let result = match operation {
        "blur" => img.blur(param.unwrap_or(2.0) as f32),
        "grayscale" => img.grayscale(),
        "rotate" => match param.unwrap_or(90.0) as i64 {
            90 => img.rotate90(),
            180 => img.rotate180(),
            270 => img.rotate270(),
            other => return Err(format!("rotate unterstuetzt 90/180/270, nicht {other}")),
        },
        "resize" => {
            let percent = param.unwrap_or(50.0);
            if percent <= 0.0 || percent > 400.0 {
                return Err("resize-Prozent muss zwischen 1 und 400 liegen".to_string());
            }
            let w = ((img.width() as f64 * percent / 100.0).round() as u32).max(1);
            let h = ((img.height() as f64 * percent / 100.0).round() as u32).max(1);
            img.resize_exact(w, h, image::imageops::FilterType::Lanczos3)
        }
        "sharpen" => img.unsharpen(param.unwrap_or(2.0) as f32, 5),
        "brightness" => img.brighten(param.unwrap_or(30.0) as i32),
        "contrast" => img.adjust_contrast(param.unwrap_or(20.0) as f32),
        "flip_horizontal" => img.fliph(),
        "flip_vertical" => img.flipv(),
        "invert" => {
            let mut inverted = img;
            inverted.invert();
            inverted
        }
        other => return Err(format!("Unbekannte Operation: {other}")),
    };
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_image() -> DynamicImage {
        DynamicImage::ImageRgb8(image::RgbImage::from_fn(8, 4, |x, y| {
            image::Rgb([(x * 30) as u8, (y * 60) as u8, 128])
        }))
    }

    #[test]
    fn rotate_swaps_dimensions() {
        let img = test_image();
        let rotated = apply_operation(img, "rotate", Some(90.0)).unwrap();
        assert_eq!((rotated.width(), rotated.height()), (4, 8));
    }

    #[test]
    fn resize_scales_by_percent() {
        let resized = apply_operation(test_image(), "resize", Some(50.0)).unwrap();
        assert_eq!((resized.width(), resized.height()), (4, 2));
    }

    #[test]
    fn unknown_operation_and_bad_rotate_fail() {
        assert!(apply_operation(test_image(), "zoom", None).is_err());
        assert!(apply_operation(test_image(), "rotate", Some(45.0)).is_err());
        assert!(apply_operation(test_image(), "resize", Some(0.0)).is_err());
    }

    #[test]
    fn flip_and_invert_keep_dimensions() {
        for op in ["flip_horizontal", "flip_vertical", "invert", "grayscale"] {
            let out = apply_operation(test_image(), op, None).unwrap();
            assert_eq!((out.width(), out.height()), (8, 4), "op {op}");
        }
    }
}
