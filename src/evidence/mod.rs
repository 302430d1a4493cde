//! Evidence extractors: independent, advisory readings of the uploaded
//! photos. Each runs once per request, never fails the request, and
//! degrades to an all-empty record when the model call or parse fails.

pub mod tags;
pub mod visual;

pub use tags::read_tags;
pub use visual::recognize_visual;
