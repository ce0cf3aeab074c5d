//! End-to-end pipeline behavior against an in-memory fetcher.

use std::cell::RefCell;
use std::rc::Rc;

use snapdoc::capture::{CanvasData, CaptureData, FramePayload, ImageMeta, PageData};
use snapdoc::fetch::{MemoryFetcher, ResourceFetcher};
use snapdoc::progress::ProgressEvent;
use snapdoc::stats::ResourceCategory;
use snapdoc::utils::constants::{image_index_attribute, input_value_attribute, window_id_attribute};
use snapdoc::utils::EMPTY_IMAGE;
use snapdoc::{CaptureOptions, capture_page, dom};

fn base_options() -> CaptureOptions {
    let mut options = CaptureOptions::for_url("http://x/");
    options.insert_favicon_link = false;
    options.insert_provenance_comment = false;
    options.compress_html = false;
    options
}

async fn run_capture(
    html: &str,
    options: CaptureOptions,
    capture: CaptureData,
    memory: &Rc<MemoryFetcher>,
) -> PageData {
    let fetcher: Rc<dyn ResourceFetcher> = memory.clone();
    capture_page(options, capture, Some(html.to_string()), fetcher, None)
        .await
        .expect("capture should succeed")
}

fn attribute_of(content: &str, selector: &str, attribute: &str) -> Option<String> {
    let doc = dom::parse_html(content);
    dom::select_first(&doc, selector)
        .and_then(|element| element.attributes.borrow().get(attribute).map(str::to_string))
}

#[tokio::test]
async fn inlines_image_sources() {
    // Scenario A: a single external image becomes its data URI.
    let memory = Rc::new(MemoryFetcher::new());
    memory.insert("http://x/a.png", "data:image/png;base64,AAA");
    let html = r#"<html><head><title>T</title></head><body><img src="http://x/a.png"></body></html>"#;

    let page = run_capture(html, base_options(), CaptureData::default(), &memory).await;

    assert_eq!(
        attribute_of(&page.content, "img", "src").as_deref(),
        Some("data:image/png;base64,AAA")
    );
    assert_eq!(page.title, "T");
}

#[tokio::test]
async fn duplicate_images_collapse_into_a_shared_css_variable() {
    // Scenario B: the second identical image references a custom property
    // instead of repeating the bytes.
    let memory = Rc::new(MemoryFetcher::new());
    memory.insert("http://x/a.png", "data:image/png;base64,AAA");
    let image_attribute = image_index_attribute(0);
    let html = format!(
        r#"<html><head></head><body><img {image_attribute}="0" src="http://x/a.png"><img {image_attribute}="1" src="http://x/a.png"></body></html>"#
    );
    let mut capture = CaptureData::default();
    for _ in 0..2 {
        capture.images.push(ImageMeta {
            current_src: None,
            px_width: 10,
            px_height: 10,
            replaceable: true,
            object_fit: None,
            object_position: None,
            background_color: None,
        });
    }

    let page = run_capture(&html, base_options(), capture, &memory).await;

    assert_eq!(memory.fetch_count("http://x/a.png"), 1);
    assert!(page.content.contains(":root{--sf-img-1:url(\"data:image/png;base64,AAA\")}"));

    let doc = dom::parse_html(&page.content);
    let images = dom::select_all(&doc, "img");
    assert_eq!(images.len(), 2);
    let sources: Vec<String> = images
        .iter()
        .map(|image| image.attributes.borrow().get("src").unwrap_or("").to_string())
        .collect();
    assert!(sources.contains(&"data:image/png;base64,AAA".to_string()));
    let styled = images
        .iter()
        .find_map(|image| {
            let attributes = image.attributes.borrow();
            attributes.get("style").map(str::to_string).filter(|style| !style.is_empty())
        })
        .expect("one image should carry the variable-backed background");
    assert!(styled.contains("var(--sf-img-1)"));
}

#[tokio::test]
async fn inline_style_urls_resolve_and_inline() {
    // Scenario C: `url('icon.png')` inside a style attribute resolves
    // against the base URI and inlines; sibling declarations survive.
    let memory = Rc::new(MemoryFetcher::new());
    memory.insert("http://x/icon.png", "data:image/png;base64,BBB");
    let html =
        r#"<html><head></head><body><div style="color:red;background:url('icon.png')">t</div></body></html>"#;

    let page = run_capture(html, base_options(), CaptureData::default(), &memory).await;

    let style = attribute_of(&page.content, "div", "style").expect("style attribute kept");
    assert!(style.contains("color:red"));
    assert!(style.contains("url(\"data:image/png;base64,BBB\")"));
    assert!(!style.contains("icon.png"));
}

#[tokio::test]
async fn script_removal_keeps_structured_data() {
    // Scenario D: plain scripts and inline handlers go, ld+json stays.
    let memory = Rc::new(MemoryFetcher::new());
    let html = concat!(
        "<html><head><script>alert(1)</script>",
        r#"<script type="application/ld+json">{"@type":"Article"}</script></head>"#,
        r#"<body><a href="http://x/p" onclick="track()">link</a></body></html>"#,
    );

    let mut options = base_options();
    options.remove_scripts = true;
    let page = run_capture(html, options, CaptureData::default(), &memory).await;

    assert!(page.content.contains("application/ld+json"));
    assert!(!page.content.contains("alert(1)"));
    assert!(!page.content.contains("onclick"));
}

#[tokio::test]
async fn frame_without_captured_content_is_discarded_not_fatal() {
    // Scenario E: the capture succeeds and only the counter records the
    // missing frame.
    let memory = Rc::new(MemoryFetcher::new());
    let window_attribute = window_id_attribute(0);
    let html = format!(
        r#"<html><head></head><body><iframe {window_attribute}="frame-0"></iframe></body></html>"#
    );
    let mut capture = CaptureData::default();
    capture.frames.push(FramePayload {
        window_id: "frame-0".to_string(),
        content: None,
        base_uri: "http://x/frame/".to_string(),
        capture: CaptureData::default(),
    });

    let mut options = base_options();
    options.display_stats = true;
    let page = run_capture(&html, options, capture, &memory).await;

    let stats = page.stats.expect("stats enabled");
    assert_eq!(stats.discarded.get(ResourceCategory::Frames), 1);
    assert_eq!(stats.processed.get(ResourceCategory::Frames), 0);
}

#[tokio::test]
async fn captured_frames_fold_in_with_merged_stats() {
    let memory = Rc::new(MemoryFetcher::new());
    memory.insert("http://x/frame/logo.png", "data:image/png;base64,FF");
    let window_attribute = window_id_attribute(0);
    let html = format!(
        r#"<html><head></head><body><iframe {window_attribute}="frame-0"></iframe></body></html>"#
    );
    let mut capture = CaptureData::default();
    capture.frames.push(FramePayload {
        window_id: "frame-0".to_string(),
        content: Some(
            r#"<html><head></head><body><p>inner</p><img src="http://x/frame/logo.png"></body></html>"#
                .to_string(),
        ),
        base_uri: "http://x/frame/".to_string(),
        capture: CaptureData::default(),
    });

    let mut options = base_options();
    options.display_stats = true;
    let page = run_capture(&html, options, capture, &memory).await;

    let srcdoc = attribute_of(&page.content, "iframe", "srcdoc").expect("frame folded in");
    assert!(srcdoc.contains("inner"));
    assert!(srcdoc.contains("data:image/png;base64,FF"));
    let stats = page.stats.expect("stats enabled");
    assert_eq!(stats.processed.get(ResourceCategory::Frames), 1);
    // The folded frame reports sandboxing derived from its content.
    assert_eq!(attribute_of(&page.content, "iframe", "sandbox").as_deref(), Some(""));
}

#[tokio::test]
async fn oversized_resources_degrade_to_the_placeholder() {
    let memory = Rc::new(MemoryFetcher::new());
    memory.insert_sized("http://x/big.png", "data:image/png;base64,CCC", 5000);
    let html = r#"<html><head></head><body><img src="http://x/big.png"></body></html>"#;

    let mut options = base_options();
    options.max_resource_size_enabled = true;
    options.max_resource_size = 1000;
    let page = run_capture(html, options, CaptureData::default(), &memory).await;

    assert_eq!(attribute_of(&page.content, "img", "src").as_deref(), Some(EMPTY_IMAGE));
}

#[tokio::test]
async fn unused_style_rules_are_removed_before_serialization() {
    let memory = Rc::new(MemoryFetcher::new());
    memory.insert("http://x/a.png", "data:image/png;base64,AAA");
    let html = concat!(
        "<html><head><style>div{background:url('a.png')} p{color:blue}</style></head>",
        "<body><div>hi</div></body></html>",
    );

    let mut options = base_options();
    options.display_stats = true;
    let page = run_capture(html, options, CaptureData::default(), &memory).await;

    assert!(page.content.contains("div{background:url(\"data:image/png;base64,AAA\")}"));
    assert!(!page.content.contains("p{color:blue}"));
    let stats = page.stats.expect("stats enabled");
    assert_eq!(stats.discarded.get(ResourceCategory::CssRules), 1);
}

#[tokio::test]
async fn stylesheet_imports_are_substituted_in_place() {
    let memory = Rc::new(MemoryFetcher::new());
    memory.insert("http://x/other.css", "h1{color:green}");
    let html = concat!(
        "<html><head><style>@import 'other.css';body{color:red}</style></head>",
        "<body><h1>t</h1></body></html>",
    );

    let page = run_capture(html, base_options(), CaptureData::default(), &memory).await;

    assert!(page.content.contains("h1{color:green}"));
    assert!(page.content.contains("body{color:red}"));
    assert!(!page.content.contains("@import"));
}

#[tokio::test]
async fn circular_imports_terminate() {
    let memory = Rc::new(MemoryFetcher::new());
    memory.insert("http://x/loop.css", "@import 'loop.css';a{color:red}");
    let html = concat!(
        "<html><head><style>@import 'loop.css';</style></head>",
        "<body><a href=\"http://x/p\">l</a></body></html>",
    );

    let page = run_capture(html, base_options(), CaptureData::default(), &memory).await;
    assert!(page.content.contains("a{color:red}"));
}

#[tokio::test]
async fn srcset_candidates_inline_with_descriptors() {
    let memory = Rc::new(MemoryFetcher::new());
    memory.insert("http://x/a.png", "data:image/png;base64,AAA");
    memory.insert("http://x/b.png", "data:image/png;base64,BBB");
    let html =
        r#"<html><head></head><body><img srcset="a.png 1x, b.png 2x"></body></html>"#;

    let page = run_capture(html, base_options(), CaptureData::default(), &memory).await;

    assert_eq!(
        attribute_of(&page.content, "img", "srcset").as_deref(),
        Some("data:image/png;base64,AAA 1x, data:image/png;base64,BBB 2x")
    );
}

#[tokio::test]
async fn canvas_bitmaps_become_backgrounds() {
    let memory = Rc::new(MemoryFetcher::new());
    let html = "<html><head></head><body><canvas></canvas></body></html>";
    let mut capture = CaptureData::default();
    capture.canvases.push(Some(CanvasData {
        data_uri: "data:image/png;base64,CV".to_string(),
    }));

    let page = run_capture(html, base_options(), capture, &memory).await;

    let style = attribute_of(&page.content, "canvas", "style").expect("canvas styled");
    assert!(style.contains("background-image:url(\"data:image/png;base64,CV\") !important"));
    assert!(style.contains("background-repeat:no-repeat !important"));
}

#[tokio::test]
async fn snapshotted_form_state_is_baked_into_attributes() {
    let memory = Rc::new(MemoryFetcher::new());
    let value_attribute = input_value_attribute(0);
    let html = format!(
        r#"<html><head></head><body><input {value_attribute}="typed"><textarea {value_attribute}="note"></textarea></body></html>"#
    );

    let page = run_capture(&html, base_options(), CaptureData::default(), &memory).await;

    assert_eq!(attribute_of(&page.content, "input", "value").as_deref(), Some("typed"));
    let doc = dom::parse_html(&page.content);
    let textarea = dom::select_first(&doc, "textarea").expect("textarea kept");
    assert_eq!(textarea.as_node().text_contents(), "note");
    // Helper attributes never leak into the output.
    assert!(!page.content.contains("data-snapdoc-"));
}

#[tokio::test]
async fn repeated_runs_are_byte_identical() {
    let html = concat!(
        "<html><head><title>Det</title>",
        "<style>div{background:url('a.png')}</style></head>",
        "<body><div style=\"background:url('a.png')\">x</div></body></html>",
    );
    let mut outputs = Vec::new();
    for _ in 0..2 {
        let memory = Rc::new(MemoryFetcher::new());
        memory.insert("http://x/a.png", "data:image/png;base64,AAA");
        let mut options = base_options();
        options.filename_template = "{page-title}.html".to_string();
        let page = run_capture(html, options, CaptureData::default(), &memory).await;
        outputs.push((page.content, page.filename));
    }
    assert_eq!(outputs[0], outputs[1]);
    assert_eq!(outputs[0].1, "Det.html");
}

#[tokio::test]
async fn progress_events_cover_the_whole_run() {
    let memory = Rc::new(MemoryFetcher::new());
    memory.insert("http://x/a.png", "data:image/png;base64,AAA");
    let html = r#"<html><head></head><body><img src="http://x/a.png"></body></html>"#;

    let events: Rc<RefCell<Vec<ProgressEvent>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = events.clone();
    let fetcher: Rc<dyn ResourceFetcher> = memory.clone();
    let page = capture_page(
        base_options(),
        CaptureData::default(),
        Some(html.to_string()),
        fetcher,
        Some(Rc::new(move |event: &ProgressEvent| sink.borrow_mut().push(event.clone()))),
    )
    .await
    .expect("capture should succeed");
    assert!(!page.content.is_empty());

    let events = events.borrow();
    assert!(events.iter().any(|event| matches!(event, ProgressEvent::PageLoading { .. })));
    assert!(
        events
            .iter()
            .any(|event| matches!(event, ProgressEvent::ResourcesInitialized { max: 1, .. }))
    );
    assert!(events.iter().any(
        |event| matches!(event, ProgressEvent::ResourceLoaded { index: 1, resource_url, .. } if resource_url == "http://x/a.png")
    ));
    for stage in 0..4 {
        assert!(events.iter().any(
            |event| matches!(event, ProgressEvent::StageEnded { stage: ended, .. } if *ended == stage)
        ));
    }
    assert!(matches!(events.last(), Some(ProgressEvent::PageEnded { .. })));
}
