mod decoder;
mod encoder;
mod value;

pub use decoder::decode;
pub use encoder::encode;
pub use value::Bencode;
