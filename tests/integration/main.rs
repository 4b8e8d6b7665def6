//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that exercises a specific subsystem
//! against in-memory adapters.  No reader hardware is required.

mod detector_tests;
mod mock_rig;
mod scheduler_tests;
