use cifras_core::reorder::{ItemBounds, ReorderController};
use cifras_core::selection::SelectionState;
use cifras_core::service::SkipReason;
use cifras_core::{
    Backends, CollectionService, IncomingFile, LocalStore, PersistenceBackend, Settings,
};
use std::sync::Arc;
use tempfile::tempdir;

fn settings() -> Settings {
    Settings {
        fixed_tabs: vec!["Domingo Manhã".into(), "Domingo Noite".into(), "Quarta".into()],
        debounce_ms: 20,
        ..Settings::default()
    }
}

fn image(name: &str) -> IncomingFile {
    IncomingFile::new(name, "image/png", format!("bytes of {name}").into_bytes())
}

fn open_at(path: &std::path::Path) -> (CollectionService, Arc<LocalStore>) {
    let store = Arc::new(LocalStore::open(path).expect("open store"));
    let service = CollectionService::open(Backends::local_only(store.clone()), &settings())
        .expect("open service");
    (service, store)
}

fn view(service: &CollectionService, tab: &str) -> Vec<(String, usize)> {
    service
        .items_view(tab, None)
        .into_iter()
        .map(|item| (item.display_name.clone(), item.order))
        .collect()
}

#[test]
fn state_survives_restart() {
    let dir = tempdir().expect("tempdir");
    let db = dir.path().join("cifras.db");

    let (mut service, _) = open_at(&db);
    let ensaio = service.add_tab("Ensaio").expect("add tab");
    service
        .add_items(ensaio.id(), vec![image("a.png"), image("b.png"), image("c.png")])
        .expect("add items");
    service.reorder_item(ensaio.id(), 2, 0).expect("reorder");
    service.toggle_item(ensaio.id(), "b.png").expect("toggle");
    service.flush().expect("flush");
    let before = service.model().clone();
    drop(service);

    let (reopened, store) = open_at(&db);
    assert_eq!(reopened.model(), &before);
    assert_eq!(reopened.active_tab_id(), ensaio.id());
    assert_eq!(reopened.selection_state(), SelectionState::SelectionMode);
    assert_eq!(
        view(&reopened, ensaio.id()),
        vec![
            ("c.png".to_string(), 0),
            ("a.png".to_string(), 1),
            ("b.png".to_string(), 2)
        ]
    );
    assert_eq!(store.blob_count().expect("count"), 3);
}

#[test]
fn dropping_the_service_persists_the_last_mutation() {
    let dir = tempdir().expect("tempdir");
    let db = dir.path().join("cifras.db");

    let (mut service, _) = open_at(&db);
    service.switch_tab("quarta").expect("switch");
    service
        .add_items("quarta", vec![image("late.png")])
        .expect("add");
    drop(service);

    let (reopened, _) = open_at(&db);
    assert_eq!(reopened.active_tab_id(), "quarta");
    assert_eq!(view(&reopened, "quarta").len(), 1);
}

#[test]
fn ensaio_duplicate_is_rejected() {
    let store = Arc::new(LocalStore::open_in_memory().expect("store"));
    let mut service =
        CollectionService::open(Backends::local_only(store), &settings()).expect("service");

    let first = service.add_tab("Ensaio").expect("first");
    assert!(service.add_tab("Ensaio").is_err());
    let user_tabs: Vec<_> = service.model().user_tabs().collect();
    assert_eq!(user_tabs.len(), 1);
    assert_eq!(user_tabs[0].id(), first.id());
}

#[test]
fn orders_stay_dense_through_mixed_mutations() {
    let store = Arc::new(LocalStore::open_in_memory().expect("store"));
    let mut service =
        CollectionService::open(Backends::local_only(store), &settings()).expect("service");
    let tab = service.active_tab_id().to_string();

    let names: Vec<String> = (0..8).map(|ix| format!("{ix}.png")).collect();
    service
        .add_items(&tab, names.iter().map(|name| image(name)).collect())
        .expect("add");
    service.reorder_item(&tab, 7, 0).expect("reorder");
    service
        .delete_items(&tab, &["3.png".into(), "5.png".into(), "missing.png".into()])
        .expect("delete");
    service.reorder_item(&tab, 1, 4).expect("reorder");
    service.add_items(&tab, vec![image("8.png")]).expect("add");

    let orders: Vec<usize> = view(&service, &tab).into_iter().map(|(_, order)| order).collect();
    assert_eq!(orders, (0..7).collect::<Vec<_>>());
    service.model().verify_invariants().expect("invariants");
}

#[test]
fn batch_with_duplicates_adds_each_name_once() {
    let store = Arc::new(LocalStore::open_in_memory().expect("store"));
    let mut service =
        CollectionService::open(Backends::local_only(store.clone()), &settings()).expect("service");
    let tab = service.active_tab_id().to_string();
    service.add_items(&tab, vec![image("a.png")]).expect("seed");

    let outcome = service
        .add_items(&tab, vec![image("a.png"), image("b.png"), image("b.png")])
        .expect("add");
    assert_eq!(outcome.added, vec!["b.png".to_string()]);
    assert!(outcome
        .skipped
        .iter()
        .all(|(_, reason)| *reason == SkipReason::Duplicate));
    assert_eq!(view(&service, &tab).len(), 2);
    assert_eq!(store.blob_count().expect("count"), 2);
}

#[test]
fn removing_a_user_tab_deletes_its_blobs() {
    let store = Arc::new(LocalStore::open_in_memory().expect("store"));
    let mut service =
        CollectionService::open(Backends::local_only(store.clone()), &settings()).expect("service");
    let tab = service.add_tab("Ensaio").expect("tab");
    service
        .add_items(tab.id(), vec![image("a.png"), image("b.png")])
        .expect("add");
    assert_eq!(store.blob_count().expect("count"), 2);

    service.remove_tab(tab.id()).expect("remove");
    assert_eq!(store.blob_count().expect("count"), 0);
    assert!(store.get_blob(tab.id(), "a.png").expect("get").is_none());
}

#[test]
fn drag_gesture_feeds_reorder() {
    let store = Arc::new(LocalStore::open_in_memory().expect("store"));
    let mut service =
        CollectionService::open(Backends::local_only(store), &settings()).expect("service");
    let tab = service.active_tab_id().to_string();
    service
        .add_items(&tab, vec![image("a"), image("b"), image("c")])
        .expect("add");
    service.toggle_item(&tab, "b").expect("toggle");

    let bounds: Vec<ItemBounds> = (0..3)
        .map(|ix| ItemBounds::new(ix as f32 * 50.0, 50.0))
        .collect();
    let mut drag = ReorderController::new();
    drag.start_drag(0, "a", 3);
    assert_eq!(service.selection_state(), SelectionState::SelectionMode);
    drag.update_pointer(140.0, &bounds);
    let request = drag.drop_item().expect("moved");

    assert!(service
        .reorder_item(&tab, request.from, request.to)
        .expect("reorder"));
    let names: Vec<String> = view(&service, &tab).into_iter().map(|(name, _)| name).collect();
    assert_eq!(names, vec!["b", "c", "a"]);
    assert_eq!(service.selection_state(), SelectionState::Idle);
}

#[test]
fn select_all_pair_restores_empty_selection() {
    let store = Arc::new(LocalStore::open_in_memory().expect("store"));
    let mut service =
        CollectionService::open(Backends::local_only(store), &settings()).expect("service");
    let tab = service.active_tab_id().to_string();
    service
        .add_items(&tab, vec![image("a"), image("b")])
        .expect("add");

    service.toggle_select_all(&tab).expect("select all");
    assert_eq!(service.model().selection_len(&tab), 2);
    service.toggle_select_all(&tab).expect("clear all");
    assert_eq!(service.model().selection_len(&tab), 0);
    assert_eq!(service.selection_state(), SelectionState::Idle);
}

#[test]
fn debounced_writes_coalesce() {
    let store = Arc::new(LocalStore::open_in_memory().expect("store"));
    let mut service = CollectionService::open(
        Backends::local_only(store),
        &Settings {
            debounce_ms: 60_000,
            ..settings()
        },
    )
    .expect("service");
    let tab = service.active_tab_id().to_string();
    for name in ["a", "b", "c", "d"] {
        service.add_items(&tab, vec![image(name)]).expect("add");
    }
    service.flush().expect("flush");

    let stats = service.writer_stats();
    assert_eq!(stats.scheduled, 4);
    assert_eq!(stats.written, 1);
}
