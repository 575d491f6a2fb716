//! the test_utils folder here will share utils or test components between unit
//! tests and integration tests
mod common;
mod mock_cluster;

pub use common::*;
pub use mock_cluster::*;
