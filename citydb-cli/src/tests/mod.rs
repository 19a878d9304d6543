//! Shared test harness modules for the CLI.

use super::*;

mod steps;
