pub mod chunk;
pub mod io;

pub use chunk::Chunk;
pub use io::{read_image_stack, read_label_stack, write_image_stack, write_label_stack};
