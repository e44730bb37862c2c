//! Request notification subscribers
//!
//! After every processed request the ATL asks this manager to notify the
//! first subscriber whose owner, request type and specific-request mask
//! match the request. Only one subscriber is ever called per request.
//! Subscribers without an owner hear about requests of every owner.
//!
//! Callers that hold the manager behind a lock use [`EventListenerManager::find_callback`]
//! and invoke the callback after releasing it, so callbacks may add or
//! remove listeners.

use std::sync::Arc;

use crate::request::{RequestInfo, RequestType};
use crate::types::OwnerId;

/// Callback invoked with the outcome of a processed request
pub type RequestCallback = Arc<dyn Fn(&RequestInfo) + Send + Sync>;

/// Every specific request of a type
pub const ALL_SPECIFIC_REQUESTS: u32 = u32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestTypeFilter {
    #[default]
    All,
    Only(RequestType),
}

impl RequestTypeFilter {
    #[inline]
    pub fn matches(&self, request_type: RequestType) -> bool {
        match self {
            Self::All => true,
            Self::Only(t) => *t == request_type,
        }
    }
}

#[derive(Clone)]
pub struct RequestListener {
    /// `None` only in removal queries, meaning "any callback of this owner"
    pub callback: Option<RequestCallback>,
    pub owner: Option<OwnerId>,
    pub request_type: RequestTypeFilter,
    pub specific_mask: u32,
}

impl RequestListener {
    pub fn new(callback: RequestCallback, owner: Option<OwnerId>) -> Self {
        Self {
            callback: Some(callback),
            owner,
            request_type: RequestTypeFilter::All,
            specific_mask: ALL_SPECIFIC_REQUESTS,
        }
    }

    pub fn with_filter(mut self, request_type: RequestTypeFilter, specific_mask: u32) -> Self {
        self.request_type = request_type;
        self.specific_mask = specific_mask;
        self
    }

    fn same_callback(&self, other: &Self) -> bool {
        match (&self.callback, &other.callback) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }

    fn is_duplicate_of(&self, other: &Self) -> bool {
        self.same_callback(other)
            && self.owner == other.owner
            && self.request_type == other.request_type
            && self.specific_mask == other.specific_mask
    }

    fn matches(&self, info: &RequestInfo) -> bool {
        (self.owner.is_none() || self.owner == info.owner)
            && self.request_type.matches(info.request_type)
            && self.specific_mask & info.specific_request != 0
    }
}

impl std::fmt::Debug for RequestListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestListener")
            .field("has_callback", &self.callback.is_some())
            .field("owner", &self.owner)
            .field("request_type", &self.request_type)
            .field("specific_mask", &format_args!("{:#x}", self.specific_mask))
            .finish()
    }
}

#[derive(Default)]
pub struct EventListenerManager {
    listeners: Vec<RequestListener>,
}

impl EventListenerManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false (and keeps the list unchanged) for exact duplicates
    pub fn add_request_listener(&mut self, listener: RequestListener) -> bool {
        if listener.callback.is_none() {
            log::warn!("Request listener without callback ignored");
            return false;
        }
        if self.listeners.iter().any(|l| l.is_duplicate_of(&listener)) {
            log::warn!("Request listener already registered: {:?}", listener);
            return false;
        }
        self.listeners.push(listener);
        true
    }

    /// Remove the first listener with the same owner and callback
    /// (any callback when `callback` is `None`)
    pub fn remove_request_listener(
        &mut self,
        callback: Option<&RequestCallback>,
        owner: Option<OwnerId>,
    ) -> bool {
        let position = self.listeners.iter().position(|l| {
            let callback_matches = match (callback, &l.callback) {
                (None, _) => true,
                (Some(wanted), Some(cb)) => Arc::ptr_eq(wanted, cb),
                (Some(_), None) => false,
            };
            callback_matches && l.owner == owner
        });
        match position {
            Some(index) => {
                self.listeners.swap_remove(index);
                true
            }
            None => {
                log::warn!("No request listener to remove for owner {:?}", owner);
                false
            }
        }
    }

    /// Callback of the first matching listener
    pub fn find_callback(&self, info: &RequestInfo) -> Option<RequestCallback> {
        self.listeners
            .iter()
            .find(|l| l.matches(info))
            .and_then(|l| l.callback.clone())
    }

    /// Call the first matching listener
    pub fn notify(&self, info: &RequestInfo) {
        if let Some(callback) = self.find_callback(info) {
            callback(info);
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}
