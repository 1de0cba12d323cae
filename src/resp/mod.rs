pub mod reader;
pub mod value;

pub use reader::{parse_request, ReadError, RequestReader};
pub use value::RespValue;
