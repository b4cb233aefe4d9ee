// Domain layer: report types and ports. Format details live in `crate::format`.

pub mod model;
pub mod ports;
