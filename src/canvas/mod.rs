//! Canvas model: object specs, whiteboard actions, and the skill-batch
//! translator. Pure data and pure functions; no I/O.

pub mod action;
pub mod object;
pub mod translate;

pub use action::{ActionBatch, ClearScope, ObjectUpdate, WhiteboardAction};
pub use object::{CanvasObjectSpec, EphemeralObject, ObjectKind, ObjectSource, SpecError};
