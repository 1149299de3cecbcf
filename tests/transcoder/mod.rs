//! Transcoder module tests.

mod progress_test;
