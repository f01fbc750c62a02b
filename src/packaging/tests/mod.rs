use super::test_helpers::*;
use super::*;
use crate::error::Error;
use crate::notifier::{ScriptFlavor, ScriptOptions};
use crate::types::{BundleState, Event, JobAttribute, JobState};
use std::time::Duration;
