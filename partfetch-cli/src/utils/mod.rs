mod headers;
mod parts;
pub mod progress;
mod size;

pub use self::headers::parse_headers;
pub use self::parts::parse_part;
pub use self::size::format_bytes;
pub use self::size::parse_size;
