use std::fmt;
use std::sync::{RwLock, RwLockReadGuard};

use conduit_api::types::RemoteFn;

/// Name → function map for one side of a portal, kept in registration
/// order.
#[derive(Default)]
pub struct FunctionRegistry {
    functions: RwLock<Vec<(String, RemoteFn)>>,
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRegistry").field("names", &self.names()).finish()
    }
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<(String, RemoteFn)>> {
        self.functions.read().unwrap_or_else(|p| p.into_inner())
    }

    /// Registers `function` under `name`, replacing any previous entry with
    /// that name in place.
    pub fn register(&self, name: impl Into<String>, function: RemoteFn) {
        let name = name.into();
        let mut functions = self.functions.write().unwrap_or_else(|p| p.into_inner());
        match functions.iter_mut().find(|(existing, _)| *existing == name) {
            Some(entry) => entry.1 = function,
            None => functions.push((name, function)),
        }
    }

    pub fn get(&self, name: &str) -> Option<RemoteFn> {
        self.read()
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, function)| function.clone())
    }

    /// Registered names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.read().iter().map(|(name, _)| name.clone()).collect()
    }
}
