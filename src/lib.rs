pub mod checksum;
pub mod cipher;
pub mod container;
pub mod extract;
pub mod header;

pub use checksum::checksum;
pub use cipher::{
    decrypt, encrypt, has_signature, recover_key, CipherKey, CipherState, HEADER_KEY, SIGNATURE,
};
pub use container::{parse, BlockSink, MemorySink, ParseError, ParseReport, RawBlock};
pub use header::{BlockEntry, ContainerHeader, CONTAINER_MAGIC, HEADER_SIZE};
