//! Host command surface of the editor.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

use quire_editor_core::{
    ChangeOrigin, CommandArgs, DocumentInfo, Editor, EditorConfig, EditorError, EditorEvent,
    EmbedHandler, EmbedSuggestion, EventKind, ExternalValue, FileHandler, ImageAttrs, ScrollBehavior,
    Selection,
};

#[derive(Default)]
struct RecordingFiles {
    removed: RefCell<Vec<String>>,
}

impl FileHandler for RecordingFiles {
    fn on_asset_removed(&self, src: &str) {
        self.removed.borrow_mut().push(src.to_owned());
    }
}

fn editor(html: &str) -> Editor {
    Editor::new(EditorConfig::default().with_initial_value(html))
}

#[test]
fn test_blank_initial_value_is_empty_paragraph() {
    assert_eq!(editor("   ").html(), "<p></p>");
    assert_eq!(Editor::new(EditorConfig::default()).html(), "<p></p>");
}

#[test]
fn test_malformed_content_keeps_prior_state() {
    let mut ed = editor("<p>kept</p>");
    let updates = Rc::new(Cell::new(0));
    let _sub = {
        let updates = updates.clone();
        ed.subscribe(EventKind::Update, move |_| updates.set(updates.get() + 1))
    };

    let err = ed.set_content("<p>broken", true).unwrap_err();
    assert!(matches!(err, EditorError::ContentSyncFailed(_)));
    assert_eq!(ed.html(), "<p>kept</p>");
    assert_eq!(updates.get(), 0);

    ed.set_content("<h1>new</h1>", true).unwrap();
    assert_eq!(ed.html(), "<h1>new</h1>");
    assert_eq!(updates.get(), 1);
}

#[test]
fn test_set_content_without_emit() {
    let mut ed = editor("<p>a</p>");
    let updates = Rc::new(Cell::new(0));
    let transactions = Rc::new(Cell::new(0));
    let _u = {
        let updates = updates.clone();
        ed.subscribe(EventKind::Update, move |_| updates.set(updates.get() + 1))
    };
    let _t = {
        let transactions = transactions.clone();
        ed.subscribe(EventKind::Transaction, move |_| transactions.set(transactions.get() + 1))
    };
    ed.set_content("<p>b</p>", false).unwrap();
    assert_eq!(updates.get(), 0);
    assert_eq!(transactions.get(), 1);
}

#[test]
fn test_insert_at_position_clamps() {
    let mut ed = editor("<p>one</p>");
    ed.insert_at_position(10_000, "<p>two</p>").unwrap();
    assert_eq!(ed.html(), "<p>one</p><p>two</p>");

    ed.insert_at_position(2, "<p>X</p>").unwrap();
    assert_eq!(ed.html(), "<p>oXne</p><p>two</p>");
}

#[test]
fn test_insert_at_cursor_replaces_selection() {
    let mut ed = editor("<p>Hello world</p>");
    ed.set_selection(Selection::new(7, 12)).unwrap();
    ed.insert_at_cursor("<p><strong>there</strong></p>").unwrap();
    assert_eq!(ed.html(), "<p>Hello <strong>there</strong></p>");
    assert_eq!(ed.selection(), Selection::collapsed(12));
}

#[test]
fn test_selection_only_change_is_a_transaction() {
    let mut ed = editor("<p>abc</p>");
    let seen: Rc<RefCell<Vec<(Selection, bool)>>> = Rc::default();
    let _sub = {
        let seen = seen.clone();
        ed.on_state_change(move |sel, changed| seen.borrow_mut().push((sel, changed)))
    };
    ed.set_selection(Selection::new(1, 3)).unwrap();
    assert_eq!(*seen.borrow(), vec![(Selection::new(1, 3), false)]);
}

#[test]
fn test_unknown_menu_item() {
    let mut ed = editor("<p>x</p>");
    let before = ed.content_version();
    let err = ed.execute_menu_item("sparkle", &CommandArgs::default()).unwrap_err();
    assert!(matches!(err, EditorError::CommandNotFound(key) if key == "sparkle"));
    assert_eq!(ed.content_version(), before);
    assert!(!ed.is_menu_item_active("sparkle"));
}

#[test]
fn test_menu_items() {
    let mut ed = editor("<p>Title</p>");
    ed.set_selection(Selection::new(1, 6)).unwrap();
    ed.execute_menu_item("h2", &CommandArgs::default()).unwrap();
    ed.execute_menu_item("bold", &CommandArgs::default()).unwrap();
    assert_eq!(ed.html(), "<h2><strong>Title</strong></h2>");
    assert!(ed.is_menu_item_active("h2"));
    assert!(ed.is_menu_item_active("bold"));
    assert!(!ed.is_menu_item_active("italic"));
}

#[test]
fn test_flagged_extension_hides_command() {
    let mut config = EditorConfig::default();
    config.flagged_extensions.insert("image".into());
    let mut ed = Editor::new(config);
    let args = CommandArgs::image(ImageAttrs {
        src: Some("a".into()),
        ..ImageAttrs::default()
    });
    assert!(matches!(
        ed.execute_menu_item("image", &args),
        Err(EditorError::CommandNotFound(_))
    ));
}

#[test]
fn test_selected_text_is_block_markup() {
    let mut ed = editor("<h1>Head</h1><p>body</p><p>tail</p>");
    assert_eq!(ed.selected_text(), None);
    ed.set_selection(Selection::new(2, 9)).unwrap();
    assert_eq!(ed.selected_text().as_deref(), Some("<h1>Head</h1><p>body</p>"));
}

#[test]
fn test_insert_text() {
    let mut ed = editor("<p>Hello world</p>");

    // No selection, no change.
    ed.insert_text("<p>x</p>", false).unwrap();
    assert_eq!(ed.html(), "<p>Hello world</p>");

    ed.set_selection(Selection::new(1, 6)).unwrap();
    ed.insert_text("<p>Howdy</p>", false).unwrap();
    assert_eq!(ed.html(), "<p>Howdy world</p>");

    ed.set_selection(Selection::new(1, 6)).unwrap();
    ed.insert_text("<p>next</p>", true).unwrap();
    assert_eq!(ed.html(), "<p>Howdy<br>next world</p>");
}

#[test]
fn test_document_info() {
    let ed = editor("<p>one two</p><p>three</p>");
    assert_eq!(
        ed.document_info(),
        DocumentInfo {
            characters: 12,
            words: 3,
            paragraphs: 2,
        }
    );
}

#[test]
fn test_focus_at_position() {
    let mut ed = editor("<p>ab</p>");
    let focused = Rc::new(Cell::new(None));
    let _sub = {
        let focused = focused.clone();
        ed.subscribe(EventKind::Focus, move |e| {
            if let EditorEvent::Focus { position } = e {
                focused.set(Some(*position));
            }
        })
    };
    ed.set_focus_at_position(999).unwrap();
    assert_eq!(ed.html(), "<p>ab</p><p></p>");
    assert_eq!(focused.get(), Some(5));
    assert!(ed.state().focused);

    ed.blur().unwrap();
    assert!(!ed.state().focused);
}

#[test]
fn test_scroll_request_is_clamped() {
    let mut ed = editor("<p>ab</p>");
    let seen = Rc::new(Cell::new(None));
    let _sub = {
        let seen = seen.clone();
        ed.subscribe(EventKind::Scroll, move |e| {
            if let EditorEvent::Scroll { position, behavior } = e {
                seen.set(Some((*position, *behavior)));
            }
        })
    };
    ed.scroll_to_position(50, ScrollBehavior::Smooth).unwrap();
    assert_eq!(seen.get(), Some((4, ScrollBehavior::Smooth)));
}

#[test]
fn test_external_value_waits_for_uploads() {
    let mut ed = editor("<p>local</p>");
    ed.update_assets_upload_status(BTreeMap::from([("img-1".into(), 30)])).unwrap();
    assert!(!ed.is_ready_to_discard());

    assert!(!ed.sync_external_value(ExternalValue::Value("<p>server</p>".into())).unwrap());
    assert_eq!(ed.html(), "<p>local</p>");

    ed.update_assets_upload_status(BTreeMap::from([("img-1".into(), 100)])).unwrap();
    assert!(ed.is_ready_to_discard());
    assert_eq!(ed.html(), "<p>server</p>");
}

#[test]
fn test_external_value_clamps_selection() {
    let mut ed = editor("<p>a long paragraph</p>");
    ed.set_selection(Selection::collapsed(15)).unwrap();
    assert!(ed.sync_external_value(ExternalValue::Value("<p>ab</p>".into())).unwrap());
    assert_eq!(ed.selection(), Selection::collapsed(3));
}

#[test]
fn test_external_no_sync_and_not_loaded() {
    let mut ed = editor("<p>a</p>");
    assert_eq!(ExternalValue::from(None), ExternalValue::NoSync);
    assert_eq!(ExternalValue::from(Some(String::new())), ExternalValue::NotLoaded);
    assert!(!ed.sync_external_value(ExternalValue::NoSync).unwrap());
    assert!(!ed.sync_external_value(ExternalValue::NotLoaded).unwrap());
    assert_eq!(ed.html(), "<p>a</p>");
}

#[test]
fn test_image_removal_notifies_unless_clearing() {
    let files = Rc::new(RecordingFiles::default());
    let config = EditorConfig::default()
        .with_initial_value(r#"<img src="a1"><p>x</p>"#)
        .with_file_handler(files.clone());
    let mut ed = Editor::new(config);

    ed.set_content(r#"<img src="a2"><p>x</p>"#, true).unwrap();
    assert_eq!(*files.removed.borrow(), vec!["a1".to_owned()]);

    ed.clear(true).unwrap();
    assert_eq!(files.removed.borrow().len(), 1);
    assert_eq!(ed.html(), "<p></p>");
}

#[test]
fn test_remote_markup_is_tagged_remote() {
    let mut ed = editor("<p>a</p>");
    let origin = Rc::new(Cell::new(None));
    let _sub = {
        let origin = origin.clone();
        ed.subscribe(EventKind::Update, move |e| {
            if let EditorEvent::Update { origin: o, .. } = e {
                origin.set(Some(*o));
            }
        })
    };
    assert!(ed.apply_remote_markup("<p>ab</p>").unwrap());
    assert!(!ed.apply_remote_markup("<p>ab</p>").unwrap());
    assert_eq!(origin.get(), Some(ChangeOrigin::Remote));
}

#[test]
fn test_heading_change_callback() {
    let mut ed = editor("<p>x</p>");
    let outline: Rc<RefCell<Vec<String>>> = Rc::default();
    let _sub = {
        let outline = outline.clone();
        ed.on_heading_change(move |headings| {
            *outline.borrow_mut() = headings.iter().map(|h| h.text.clone()).collect();
        })
    };
    ed.set_content("<h1>One</h1><h2>Two</h2>", true).unwrap();
    assert_eq!(*outline.borrow(), vec!["One".to_owned(), "Two".to_owned()]);
    assert_eq!(ed.headings().len(), 2);
}

#[test]
fn test_undo_redo_local_history() {
    let mut ed = editor("<p>a</p>");
    ed.set_content("<p>b</p>", true).unwrap();
    assert!(ed.undo().unwrap());
    assert_eq!(ed.html(), "<p>a</p>");
    assert!(ed.redo().unwrap());
    assert_eq!(ed.html(), "<p>b</p>");

    let mut collab = Editor::new(EditorConfig::default().collaborative());
    collab.set_content("<p>b</p>", true).unwrap();
    assert!(!collab.undo().unwrap());
}

#[test]
fn test_destroyed_editor_rejects_commands() {
    let mut ed = editor("<p>a</p>");
    let destroyed = Rc::new(Cell::new(0));
    let _sub = {
        let destroyed = destroyed.clone();
        ed.subscribe(EventKind::Destroy, move |_| destroyed.set(destroyed.get() + 1))
    };
    ed.destroy();
    ed.destroy();
    assert_eq!(destroyed.get(), 1);
    assert!(matches!(ed.set_content("<p>b</p>", true), Err(EditorError::SessionClosed)));
    assert!(matches!(ed.set_focus_at_position(0), Err(EditorError::SessionClosed)));
    assert_eq!(ed.events().listener_count(EventKind::Destroy), 0);
}

struct WorkItems;

impl EmbedHandler for WorkItems {
    fn search(&self, query: &str) -> Vec<EmbedSuggestion> {
        ["Fix login", "Ship docs"]
            .iter()
            .enumerate()
            .filter(|(_, title)| title.to_lowercase().contains(&query.to_lowercase()))
            .map(|(i, title)| EmbedSuggestion {
                id: format!("item-{i}").into(),
                title: (*title).to_owned(),
            })
            .collect()
    }
}

#[test]
fn test_embed_handler_is_exposed() {
    assert!(editor("<p>a</p>").embed_suggestions("login").is_empty());

    let ed = Editor::new(EditorConfig::default().with_embed_handler(Rc::new(WorkItems)));
    assert!(ed.config().embed_handler.is_some());
    assert_eq!(
        ed.embed_suggestions("LOGIN"),
        vec![EmbedSuggestion {
            id: "item-0".into(),
            title: "Fix login".into(),
        }]
    );
}
