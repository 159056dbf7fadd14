//! Integration test entry point.
//!
//! All test modules are compiled into a single binary so they can share the
//! in-process portal harness in `common`.

mod common;
