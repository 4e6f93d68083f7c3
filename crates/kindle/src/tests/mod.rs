//! Test suites for the kindle bootstrap.

mod support;
