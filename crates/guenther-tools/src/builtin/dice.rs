use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;
use serde_json::{json, Value};

use crate::descriptor::{HandlerContext, ToolDescriptor, ToolHandler, ToolOrigin};
use crate::error::Result;

pub fn descriptor() -> ToolDescriptor {
    ToolDescriptor::new(
        "roll_dice",
        "Wuerfelt mit einem oder mehreren Wuerfeln. Gibt die Einzelergebnisse und die Summe zurueck.",
        json!({
            "type": "object",
            "properties": {
                "sides": {
                    "type": "integer",
                    "description": "Anzahl Seiten pro Wuerfel (Standard: 6)",
                    "default": 6
                },
                "count": {
                    "type": "integer",
                    "description": "Anzahl der Wuerfel (Standard: 1)",
                    "default": 1
                }
            },
            "required": []
        }),
        Arc::new(DiceHandler),
        ToolOrigin::Builtin,
    )
}

struct DiceHandler;

#[async_trait]
impl ToolHandler for DiceHandler {
    async fn call(&self, args: Value, _ctx: &HandlerContext) -> Result<Value> {
        let sides = args.get("sides").and_then(Value::as_i64).unwrap_or(6).clamp(2, 100);
        let count = args.get("count").and_then(Value::as_i64).unwrap_or(1).clamp(1, 20);

        let mut rng = rand::thread_rng();
        let rolls: Vec<i64> = (0..count).map(|_| rng.gen_range(1..=sides)).collect();
        let total: i64 = rolls.iter().sum();

        Ok(json!({
            "rolls": rolls,
            "total": total,
            "sides": sides,
            "count": count,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamping_matches_limits() {
        assert_eq!(1000i64.clamp(2, 100), 100);
        assert_eq!(0i64.clamp(2, 100), 2);
        assert_eq!(50i64.clamp(1, 20), 20);
    }

    #[test]
    fn rolls_stay_within_bounds() {
        let mut rng = rand::thread_rng();
        for _ in 0..100 {
            let roll: i64 = rng.gen_range(1..=6);
            assert!((1..=6).contains(&roll));
        }
    }
}
