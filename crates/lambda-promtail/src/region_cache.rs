// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Process-wide cache of per-region clients.
//!
//! Entries are created lazily on first use and never evicted; the number of
//! regions is small and bounded. Concurrent callers asking for the same
//! region share one [`OnceCell`], so a client is constructed at most once per
//! region and a reader never observes a partially built client.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;

pub struct RegionCache<T> {
    cells: Mutex<HashMap<String, Arc<OnceCell<T>>>>,
}

impl<T> Default for RegionCache<T> {
    fn default() -> Self {
        RegionCache {
            cells: Mutex::new(HashMap::new()),
        }
    }
}

impl<T: Clone> RegionCache<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the client of `region`, building it with `init` if needed.
    ///
    /// A failed `init` leaves the slot empty so a later call can retry.
    pub async fn get_or_try_init<F, Fut, E>(&self, region: &str, init: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let cell = self.cell(region);
        let client = cell.get_or_try_init(init).await?;
        Ok(client.clone())
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.cells.lock().map_or(0, |cells| cells.len())
    }

    fn cell(&self, region: &str) -> Arc<OnceCell<T>> {
        // A poisoned lock only means another caller panicked while inserting
        // an empty cell; the map itself is still consistent.
        let mut cells = match self.cells.lock() {
            Ok(cells) => cells,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(cells.entry(region.to_string()).or_default())
    }
}
