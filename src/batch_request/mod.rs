//! Batched resource retrieval with per-key deduplication.
//!
//! Every resource reference discovered anywhere in the document tree is
//! registered here; registering the same `(url, encoding)` key twice
//! shares one underlying fetch while each registrant still receives its
//! own resolution. Registration is synchronous — the dedup check happens
//! before any suspension point, which is what makes the shared pending
//! table safe under cooperative scheduling.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use futures::future::join_all;
use tokio::sync::oneshot;

use crate::fetch::{FetchError, FetchOptions, ResourceFetcher};

/// Identity of one fetch: the absolute (or data) URL plus whether the
/// payload is wanted as a data URI.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
    pub url: String,
    pub as_data_uri: bool,
}

/// What a registrant receives once its key has been fetched.
#[derive(Debug, Clone)]
pub struct RetrievedResource {
    pub content: String,
    /// 1-based sequence index assigned in completion order.
    pub index: usize,
    /// True for the 2nd and later registrants of a key that opted into
    /// the duplicate group; the first grouped registrant reports false.
    pub duplicate: bool,
}

struct PendingRequest {
    sender: oneshot::Sender<Result<RetrievedResource, FetchError>>,
    grouped: bool,
}

#[derive(Default)]
struct PendingTable {
    requests: HashMap<RequestKey, Vec<PendingRequest>>,
    order: Vec<RequestKey>,
}

/// One registrant's pending resolution.
pub struct ResourceTicket {
    receiver: oneshot::Receiver<Result<RetrievedResource, FetchError>>,
}

impl ResourceTicket {
    /// Wait for the batch to resolve this registration. A batch that
    /// finishes without touching the key (or is dropped) reports
    /// [`FetchError::Cancelled`].
    pub async fn resolved(self) -> Result<RetrievedResource, FetchError> {
        match self.receiver.await {
            Ok(outcome) => outcome,
            Err(_) => Err(FetchError::Cancelled),
        }
    }
}

/// Shared per-capture resource loader. Constructed once by the facade and
/// lent to every runner in the document tree.
#[derive(Default)]
pub struct BatchRequest {
    pending: RefCell<PendingTable>,
}

impl BatchRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in a resource. Never suspends; the returned
    /// ticket resolves during [`BatchRequest::run_all`].
    pub fn register(&self, url: &str, as_data_uri: bool, group_duplicates: bool) -> ResourceTicket {
        let key = RequestKey { url: url.to_string(), as_data_uri };
        let (sender, receiver) = oneshot::channel();
        let mut pending = self.pending.borrow_mut();
        if !pending.requests.contains_key(&key) {
            if !pending.order.contains(&key) {
                pending.order.push(key.clone());
            }
            pending.requests.insert(key.clone(), Vec::new());
        }
        if let Some(registrants) = pending.requests.get_mut(&key) {
            registrants.push(PendingRequest { sender, grouped: group_duplicates });
        }
        ResourceTicket { receiver }
    }

    /// Number of distinct keys currently pending.
    pub fn max_keys(&self) -> usize {
        self.pending.borrow().requests.len()
    }

    /// Fetch every distinct pending key concurrently and resolve all of
    /// its registrants. One key's failure rejects only that key's
    /// registrants; the batch itself always completes. Keys registered
    /// while a wave is in flight are picked up by the next wave.
    pub async fn run_all<F>(
        &self,
        fetcher: &Rc<dyn ResourceFetcher>,
        fetch_options: &FetchOptions,
        on_loaded: F,
    ) where
        F: Fn(usize, &str),
    {
        let sequence = Cell::new(0usize);
        loop {
            let wave: Vec<RequestKey> = {
                let pending = self.pending.borrow();
                pending
                    .order
                    .iter()
                    .filter(|key| pending.requests.contains_key(*key))
                    .cloned()
                    .collect()
            };
            if wave.is_empty() {
                return;
            }
            join_all(wave.into_iter().map(|key| {
                let fetcher = Rc::clone(fetcher);
                let sequence = &sequence;
                let on_loaded = &on_loaded;
                let fetch_options = FetchOptions {
                    as_data_uri: key.as_data_uri,
                    ..fetch_options.clone()
                };
                async move {
                    let outcome = fetcher.fetch(&key.url, &fetch_options).await;
                    let index = sequence.get() + 1;
                    sequence.set(index);
                    on_loaded(index, &key.url);
                    let registrants = self
                        .pending
                        .borrow_mut()
                        .requests
                        .remove(&key)
                        .unwrap_or_default();
                    match outcome {
                        Ok(resource) => {
                            let mut grouped_seen = 0usize;
                            for registrant in registrants {
                                let duplicate = if registrant.grouped {
                                    grouped_seen += 1;
                                    grouped_seen > 1
                                } else {
                                    false
                                };
                                let _ = registrant.sender.send(Ok(RetrievedResource {
                                    content: resource.data.clone(),
                                    index,
                                    duplicate,
                                }));
                            }
                        }
                        Err(error) => {
                            log::warn!("resource fetch failed for {}: {error}", key.url);
                            for registrant in registrants {
                                let _ = registrant.sender.send(Err(error.clone()));
                            }
                        }
                    }
                }
            }))
            .await;
        }
    }
}
