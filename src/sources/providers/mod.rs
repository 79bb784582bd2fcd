// src/sources/providers/mod.rs
pub mod brsapi;
pub mod fastforex;
pub mod navasan;
pub mod wallex;

pub use brsapi::BrsApiSource;
pub use fastforex::FastForexSource;
pub use navasan::NavasanSource;
pub use wallex::WallexSource;

use serde_json::Value;

/// Number or numeric string (`"108,400"`, `"-0.04"`) as `f64`.
pub(crate) fn json_number(node: &Value) -> Option<f64> {
    match node {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace(',', "").parse::<f64>().ok(),
        _ => None,
    }
}
