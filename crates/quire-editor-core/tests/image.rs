//! Image load failures and the one-shot restore.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use n0_future::boxed::BoxFuture;
use quire_editor_core::{
    AttributeSink, EditorError, ImageAttrs, ImageLifecycle, ImagePhase, RestoreError, RestoreImage,
    Viewport,
};

struct CountingRestore {
    calls: AtomicUsize,
    succeed: bool,
}

impl CountingRestore {
    fn new(succeed: bool) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            succeed,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl RestoreImage for CountingRestore {
    fn restore(&self, src: &str) -> BoxFuture<Result<String, RestoreError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let succeed = self.succeed;
        let src = src.to_owned();
        Box::pin(async move {
            if succeed {
                Ok(format!("https://cdn.test/{src}"))
            } else {
                Err("asset is gone".into())
            }
        })
    }
}

fn sink() -> AttributeSink {
    Rc::new(|_: &ImageAttrs| Ok::<(), EditorError>(()))
}

fn image(src: Option<&str>, restorer: Option<Arc<CountingRestore>>) -> ImageLifecycle {
    ImageLifecycle::new(
        ImageAttrs {
            src: src.map(str::to_owned),
            ..ImageAttrs::default()
        },
        Viewport::new(),
        restorer.map(|r| r as Arc<dyn RestoreImage>),
        sink(),
    )
}

#[tokio::test]
async fn test_restore_success_repoints_once() {
    let restorer = CountingRestore::new(true);
    let image = image(Some("asset-7"), Some(restorer.clone()));

    image.on_error().await.unwrap();
    assert_eq!(restorer.calls(), 1);
    assert_eq!(image.phase(), ImagePhase::Resolved);
    assert_eq!(image.source().as_deref(), Some("https://cdn.test/asset-7"));
    assert_eq!(image.attrs().src.as_deref(), Some("asset-7"));

    // The restored source failing too is terminal.
    let err = image.on_error().await.unwrap_err();
    assert!(matches!(err, EditorError::AttachmentLoadFailed { .. }));
    assert_eq!(image.phase(), ImagePhase::Errored);
    assert_eq!(restorer.calls(), 1);
}

#[tokio::test]
async fn test_restore_failure_is_terminal() {
    let restorer = CountingRestore::new(false);
    let image = image(Some("asset-8"), Some(restorer.clone()));

    assert!(image.on_error().await.is_err());
    assert_eq!(image.phase(), ImagePhase::Errored);
    assert!(image.on_error().await.is_err());
    assert_eq!(restorer.calls(), 1);
}

#[tokio::test]
async fn test_no_restorer_fails_immediately() {
    let image = image(Some("asset-9"), None);
    let err = image.on_error().await.unwrap_err();
    assert!(matches!(err, EditorError::AttachmentLoadFailed { src: Some(s) } if s == "asset-9"));
    assert_eq!(image.phase(), ImagePhase::Errored);
}

#[tokio::test]
async fn test_restore_without_source() {
    let restorer = CountingRestore::new(true);
    let image = image(None, Some(restorer.clone()));
    let err = image.on_error().await.unwrap_err();
    assert!(matches!(err, EditorError::AttachmentLoadFailed { src: None }));
    assert_eq!(restorer.calls(), 0);
}

#[test]
fn test_sink_failure_is_logged_not_raised() {
    let attempts = Rc::new(RefCell::new(0));
    let failing: AttributeSink = {
        let attempts = attempts.clone();
        Rc::new(move |_: &ImageAttrs| {
            *attempts.borrow_mut() += 1;
            Err::<(), EditorError>(EditorError::InvalidAttributes("node is gone".into()))
        })
    };
    let image = ImageLifecycle::new(
        ImageAttrs {
            src: Some("a".into()),
            ..ImageAttrs::default()
        },
        Viewport::new(),
        None,
        failing,
    );
    image.on_load(1000.0, 500.0, 1000.0);
    assert_eq!(*attempts.borrow(), 1);
    assert_eq!(image.phase(), ImagePhase::Resolved);
    assert_eq!(image.attrs().width, Some(350.0));
    assert_eq!(image.attrs().height, Some(175.0));
}
