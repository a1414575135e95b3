//! Test module for chorale-core
//!
//! This module contains tests for:
//! - Slide codes, combined slides and arrangement playback
//! - Session mutations, delta generation and replay equivalence
//! - Tool overlay lifecycle inside a session
//! - Configuration loading and defaults

mod config_tests;
