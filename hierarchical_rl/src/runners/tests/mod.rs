//! Test suite for the experiment drivers.
//!
//! # Test Organization
//!
//! - `config_tests`: defaults, validation, JSON loading
//! - `experiment_tests`: epoch schedule, metrics, weight broadcast, failures
