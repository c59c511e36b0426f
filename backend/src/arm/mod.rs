pub mod encode;
pub mod linkage;

pub use linkage::{Arm32Linkage, LinkageConfig, DIRECT_EXIT_STUB_SIZE};
