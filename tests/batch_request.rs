//! Batch deduplication and failure-isolation behavior.

use std::cell::RefCell;
use std::rc::Rc;

use snapdoc::fetch::{FetchError, FetchOptions, MemoryFetcher, ResourceFetcher};
use snapdoc::BatchRequest;

fn fetch_options() -> FetchOptions {
    FetchOptions { as_data_uri: true, max_size: 0, max_size_enabled: false, charset: None }
}

#[tokio::test]
async fn same_key_fetches_once_and_resolves_every_registrant() {
    let memory = Rc::new(MemoryFetcher::new());
    memory.insert("http://x/a.png", "data:image/png;base64,AAA");
    let fetcher: Rc<dyn ResourceFetcher> = memory.clone();

    let batch = BatchRequest::new();
    let first = batch.register("http://x/a.png", true, true);
    let second = batch.register("http://x/a.png", true, true);
    let third = batch.register("http://x/a.png", true, false);
    assert_eq!(batch.max_keys(), 1);

    batch.run_all(&fetcher, &fetch_options(), |_, _| {}).await;

    let first = first.resolved().await.unwrap();
    let second = second.resolved().await.unwrap();
    let third = third.resolved().await.unwrap();

    assert_eq!(memory.fetch_count("http://x/a.png"), 1);
    for resource in [&first, &second, &third] {
        assert_eq!(resource.content, "data:image/png;base64,AAA");
        assert_eq!(resource.index, 1);
    }
    // Only the 2nd+ member of the duplicate group reports duplication.
    assert!(!first.duplicate);
    assert!(second.duplicate);
    assert!(!third.duplicate);
}

#[tokio::test]
async fn distinct_encodings_are_distinct_keys() {
    let memory = Rc::new(MemoryFetcher::new());
    memory.insert("http://x/a.css", "body{}");
    let fetcher: Rc<dyn ResourceFetcher> = memory.clone();

    let batch = BatchRequest::new();
    let _raw = batch.register("http://x/a.css", false, false);
    let _inline = batch.register("http://x/a.css", true, false);
    assert_eq!(batch.max_keys(), 2);

    batch.run_all(&fetcher, &fetch_options(), |_, _| {}).await;
    assert_eq!(memory.fetch_count("http://x/a.css"), 2);
}

#[tokio::test]
async fn one_failing_key_rejects_only_its_registrants() {
    let memory = Rc::new(MemoryFetcher::new());
    memory.insert("http://x/ok.png", "data:image/png;base64,OK");
    let fetcher: Rc<dyn ResourceFetcher> = memory.clone();

    let batch = BatchRequest::new();
    let good = batch.register("http://x/ok.png", true, false);
    let bad = batch.register("http://x/missing.png", true, false);

    // The batch itself completes even though one key fails.
    batch.run_all(&fetcher, &fetch_options(), |_, _| {}).await;
    assert_eq!(batch.max_keys(), 0);

    assert_eq!(good.resolved().await.unwrap().content, "data:image/png;base64,OK");
    assert!(matches!(bad.resolved().await, Err(FetchError::NotFound(_))));
}

#[tokio::test]
async fn completion_callback_reports_sequence_indices() {
    let memory = Rc::new(MemoryFetcher::new());
    memory.insert("http://x/1.png", "data:image/png;base64,A");
    memory.insert("http://x/2.png", "data:image/png;base64,B");
    let fetcher: Rc<dyn ResourceFetcher> = memory.clone();

    let batch = BatchRequest::new();
    let _first = batch.register("http://x/1.png", true, false);
    let _second = batch.register("http://x/2.png", true, false);

    let seen = RefCell::new(Vec::new());
    batch
        .run_all(&fetcher, &fetch_options(), |index, url| {
            seen.borrow_mut().push((index, url.to_string()));
        })
        .await;

    let seen = seen.into_inner();
    assert_eq!(seen.len(), 2);
    let indices: Vec<usize> = seen.iter().map(|(index, _)| *index).collect();
    assert_eq!(indices, vec![1, 2]);
}

#[tokio::test]
async fn keys_registered_after_a_wave_are_still_fetched() {
    let memory = Rc::new(MemoryFetcher::new());
    memory.insert("http://x/late.png", "data:image/png;base64,L");
    memory.insert("http://x/early.png", "data:image/png;base64,E");
    let fetcher: Rc<dyn ResourceFetcher> = memory.clone();

    let batch = BatchRequest::new();
    let early = batch.register("http://x/early.png", true, false);
    batch.run_all(&fetcher, &fetch_options(), |_, _| {}).await;
    assert!(early.resolved().await.is_ok());

    // A second run picks up keys registered after the first drained.
    let late = batch.register("http://x/late.png", true, false);
    batch.run_all(&fetcher, &fetch_options(), |_, _| {}).await;
    assert_eq!(late.resolved().await.unwrap().content, "data:image/png;base64,L");
}
