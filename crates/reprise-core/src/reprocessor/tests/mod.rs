use super::*;
use crate::clock::ManualClock;
use crate::delay::{ConstantDelayStrategy, NoDelayStrategy};
use crate::error::BackendError;
use crate::handler::handler_fn;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

mod common;
use common::*;
