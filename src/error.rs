use crate::geometry::GeometryError;

/// Failure of a single engine tick. The engine state stays at its
/// previous value when a tick fails.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("geometry unavailable: {0}")]
    Geometry(#[from] GeometryError),
    #[error("invalid tick timestamp {0}")]
    InvalidTimestamp(f64),
}
