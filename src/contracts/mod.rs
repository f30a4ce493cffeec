//! Contract knowledge: ABIs, addresses, topic sets, and byte-level codecs.
//!
//! Nothing outside this module hand-rolls ABI bytes; event decoding,
//! calldata encoding, revert parsing, and the bytes32↔string conversion all
//! live here.

pub mod abi;
pub mod registry;

pub use registry::{bytes32_to_string, string_to_bytes32, ContractName, ContractRegistry};
