pub mod fixtures;
pub mod mocks;

#[allow(unused_imports)]
pub use fixtures::{seeded_bytes, sha256_hash, stage_bytes};
#[allow(unused_imports)]
pub use mocks::FlakyByteStore;
