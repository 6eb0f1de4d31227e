//! Compositing decoded images onto pooled encoder-format surfaces.

pub mod compositor;
pub mod surface;
