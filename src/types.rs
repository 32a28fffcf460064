use crate::error::{HubError, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

pub const DEFAULT_PER_PAGE: usize = 10;

/// Fixed-capacity, insertion-ordered log. Pushing past capacity drops the
/// oldest entries so the newest `max_size` are kept, oldest first.
#[derive(Debug, Clone)]
pub struct BoundedLog<T> {
    entries: VecDeque<T>,
    max_size: usize,
}

impl<T> BoundedLog<T> {
    pub fn new(max_size: usize) -> Self {
        // a zero capacity would make every push violate the bound
        let max_size = max_size.max(1);
        Self {
            entries: VecDeque::with_capacity(max_size),
            max_size,
        }
    }

    /// Appends an entry and returns the one evicted to make room, if any.
    pub fn push(&mut self, entry: T) -> Option<T> {
        let evicted = if self.entries.len() >= self.max_size {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(entry);
        evicted
    }

    pub fn latest(&self) -> Option<&T> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.max_size
    }

    /// Empties the log, returning how many entries were removed.
    pub fn clear(&mut self) -> usize {
        let removed = self.entries.len();
        self.entries.clear();
        removed
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.entries.iter()
    }

    /// The last `n` entries, oldest first.
    pub fn tail(&self, n: usize) -> impl DoubleEndedIterator<Item = &T> {
        self.entries.iter().skip(self.entries.len().saturating_sub(n))
    }

    /// Rebuilds a log from saved entries, keeping the newest `max_size`.
    pub fn from_entries(max_size: usize, entries: impl IntoIterator<Item = T>) -> Self {
        let mut log = Self::new(max_size);
        for entry in entries {
            log.push(entry);
        }
        log
    }
}

impl<T: Clone> BoundedLog<T> {
    /// One page of the log. `page` is 1-based and defaults to the last page.
    pub fn page(&self, page: Option<usize>, per_page: usize) -> Result<Page<T>> {
        if per_page == 0 {
            return Err(HubError::validation("per_page must be at least 1"));
        }

        let total = self.entries.len();
        let total_pages = total.div_ceil(per_page).max(1);
        let page = page.unwrap_or(total_pages);
        if page == 0 || page > total_pages {
            return Err(HubError::validation(format!(
                "page {} out of range (1..={})",
                page, total_pages
            )));
        }

        let start = (page - 1) * per_page;
        let end = (start + per_page).min(total);
        let entries = self
            .entries
            .range(start..end)
            .enumerate()
            .map(|(offset, entry)| PageEntry {
                index: start + offset + 1,
                entry: entry.clone(),
            })
            .collect();

        Ok(Page {
            page,
            per_page,
            total,
            total_pages,
            entries,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PageEntry<T> {
    /// 1-based position in the log at the time of the query
    pub index: usize,
    pub entry: T,
}

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub page: usize,
    pub per_page: usize,
    pub total: usize,
    pub total_pages: usize,
    pub entries: Vec<PageEntry<T>>,
}

impl<T> Page<T> {
    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            page: self.page,
            per_page: self.per_page,
            total: self.total,
            total_pages: self.total_pages,
            entries: self
                .entries
                .into_iter()
                .map(|e| PageEntry {
                    index: e.index,
                    entry: f(e.entry),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ActuatorState {
    Off,
    On,
}

impl ActuatorState {
    pub fn value(self) -> u8 {
        match self {
            ActuatorState::Off => 0,
            ActuatorState::On => 1,
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            ActuatorState::Off => ActuatorState::On,
            ActuatorState::On => ActuatorState::Off,
        }
    }
}

impl fmt::Display for ActuatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActuatorState::Off => write!(f, "OFF"),
            ActuatorState::On => write!(f, "ON"),
        }
    }
}

/// One write to the device actuator.
#[derive(Debug, Clone, Serialize)]
pub struct ActuatorEvent {
    pub timestamp: String,
    pub state: u8,
    pub response: serde_json::Value,
}

/// A successful ad-hoc REST call whose response was JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiCall {
    pub timestamp: String,
    pub method: String,
    pub url: String,
    pub status_code: u16,
    pub response: serde_json::Value,
}

/// One prompt/answer exchange with the generative-language API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub timestamp: String,
    pub model: String,
    pub label: String,
    pub prompt: String,
    pub response: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(n: usize, cap: usize) -> BoundedLog<usize> {
        let mut log = BoundedLog::new(cap);
        for i in 1..=n {
            log.push(i);
        }
        log
    }

    #[test]
    fn push_evicts_oldest_past_capacity() {
        let log = filled(1001, 1000);
        assert_eq!(log.len(), 1000);
        assert!(!log.iter().any(|&i| i == 1));
        assert_eq!(log.iter().next(), Some(&2));
        assert_eq!(log.latest(), Some(&1001));
    }

    #[test]
    fn retained_entries_stay_oldest_first() {
        let log = filled(12, 5);
        let kept: Vec<_> = log.iter().copied().collect();
        assert_eq!(kept, vec![8, 9, 10, 11, 12]);
    }

    #[test]
    fn push_reports_evicted_entry() {
        let mut log = BoundedLog::new(2);
        assert_eq!(log.push("a"), None);
        assert_eq!(log.push("b"), None);
        assert_eq!(log.push("c"), Some("a"));
    }

    #[test]
    fn zero_capacity_holds_one() {
        let log = filled(3, 0);
        assert_eq!(log.capacity(), 1);
        assert_eq!(log.len(), 1);
        assert_eq!(log.latest(), Some(&3));
    }

    #[test]
    fn tail_returns_last_n_in_order() {
        let log = filled(7, 10);
        let last: Vec<_> = log.tail(3).copied().collect();
        assert_eq!(last, vec![5, 6, 7]);
        assert_eq!(log.tail(50).count(), 7);
    }

    #[test]
    fn from_entries_keeps_newest() {
        let log = BoundedLog::from_entries(3, 1..=5);
        let kept: Vec<_> = log.iter().copied().collect();
        assert_eq!(kept, vec![3, 4, 5]);
        assert_eq!(log.capacity(), 3);
    }

    #[test]
    fn actuator_toggles() {
        assert_eq!(ActuatorState::Off.toggled(), ActuatorState::On);
        assert_eq!(ActuatorState::On.toggled().value(), 0);
    }

    #[test]
    fn clear_reports_removed() {
        let mut log = filled(4, 10);
        assert_eq!(log.clear(), 4);
        assert!(log.is_empty());
        assert!(log.latest().is_none());
    }

    #[test]
    fn default_page_is_last() {
        let log = filled(25, 100);
        let page = log.page(None, 10).unwrap();
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.page, 3);
        let indices: Vec<_> = page.entries.iter().map(|e| e.index).collect();
        assert_eq!(indices, vec![21, 22, 23, 24, 25]);
        assert_eq!(page.entries[0].entry, 21);
    }

    #[test]
    fn explicit_page_slices_log() {
        let log = filled(25, 100);
        let page = log.page(Some(2), 10).unwrap();
        assert_eq!(page.entries.len(), 10);
        assert_eq!(page.entries.first().unwrap().index, 11);
        assert_eq!(page.entries.last().unwrap().index, 20);
    }

    #[test]
    fn empty_log_has_one_empty_page() {
        let log: BoundedLog<usize> = BoundedLog::new(10);
        let page = log.page(None, DEFAULT_PER_PAGE).unwrap();
        assert_eq!(page.total_pages, 1);
        assert!(page.entries.is_empty());
    }

    #[test]
    fn bad_paging_is_rejected() {
        let log = filled(5, 10);
        assert!(log.page(Some(2), 10).is_err());
        assert!(log.page(Some(0), 10).is_err());
        assert!(log.page(None, 0).is_err());
    }

    #[test]
    fn page_map_keeps_indices() {
        let log = filled(3, 10);
        let page = log.page(None, 2).unwrap().map(|n| n * 10);
        assert_eq!(page.entries[0].index, 3);
        assert_eq!(page.entries[0].entry, 30);
    }
}
