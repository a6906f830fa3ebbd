//! Test suites for the catapult daemon.

pub(crate) mod support;
