//! Compiled-in tools. Each module exposes a `descriptor()` building its
//! registry entry; `register_builtin_tools` wires them all at boot.

pub mod calculator;
pub mod delete_tool;
pub mod dice;
pub mod fetch_url;
pub mod image_gen;
pub mod process_image;
pub mod send_telegram;
pub mod time;
pub mod tts;

use tracing::info;

use crate::builder;
use crate::registry::ToolRegistry;

pub fn register_builtin_tools(registry: &ToolRegistry) -> usize {
    let descriptors = vec![
        time::descriptor(),
        dice::descriptor(),
        calculator::descriptor(),
        fetch_url::descriptor(),
        image_gen::descriptor(),
        tts::descriptor(),
        process_image::descriptor(),
        send_telegram::descriptor(),
        builder::descriptor(),
        delete_tool::descriptor(),
    ];
    let count = descriptors.len();
    for descriptor in descriptors {
        registry.register(descriptor);
    }
    info!(count, "built-in tools registered");
    count
}
