pub mod decoder;
pub mod element;
pub mod preview;
pub mod stream_source;
