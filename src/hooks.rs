//! Before/after handler chains run around every logical request.
//!
//! Before handlers run once per logical call, ahead of the first dispatch
//! and not before replays. After handlers run once with the final payload
//! when the call succeeds. Neither chain runs on failure paths.
//!
//! A handler that returns an error stops its chain and fails the call with
//! [`JwtHttpError::Hook`]; later handlers are not invoked.

use std::{fmt, sync::Arc};

use serde_json::Value;

use crate::{error::BoxError, JwtHttpError, Result};

pub type BeforeHandler = Arc<dyn Fn() -> std::result::Result<(), BoxError> + Send + Sync>;
pub type AfterHandler = Arc<dyn Fn(&Value) -> std::result::Result<(), BoxError> + Send + Sync>;

#[derive(Clone, Default)]
pub(crate) struct Hooks {
    before: Vec<BeforeHandler>,
    after: Vec<AfterHandler>,
}

impl Hooks {
    pub fn push_before(&mut self, handler: BeforeHandler) {
        self.before.push(handler);
    }

    pub fn push_after(&mut self, handler: AfterHandler) {
        self.after.push(handler);
    }

    pub fn run_before(&self) -> Result<()> {
        for handler in &self.before {
            handler().map_err(JwtHttpError::Hook)?;
        }
        Ok(())
    }

    pub fn run_after(&self, result: &Value) -> Result<()> {
        for handler in &self.after {
            handler(result).map_err(JwtHttpError::Hook)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("before", &self.before.len())
            .field("after", &self.after.len())
            .finish()
    }
}
