//! End-to-end scenarios exercising the Facade, the public surface an
//! embedder actually calls.
//!
//! `Context` is a process-wide singleton, and every test in
//! this binary shares it, so all tests here serialize on `TEST_LOCK` and
//! explicitly set both `caller` and `lot_home` before touching the Facade.

use std::sync::Mutex;

use lotman::{
    Context, DirUsageNode, Facade, LotError, ManagementPolicyAttrs, NewLotSpec, PathEntry,
    StoreConfig, DEFAULT_LOT,
};

static TEST_LOCK: Mutex<()> = Mutex::new(());

fn open_facade(ctx: &Context) -> (tempfile::TempDir, Facade) {
    let dir = tempfile::tempdir().unwrap();
    ctx.set("lot_home", dir.path().to_string_lossy().into_owned()).unwrap();
    ctx.set("caller", "root").unwrap();
    let facade = Facade::open(ctx, StoreConfig::default()).unwrap();
    (dir, facade)
}

fn add(facade: &Facade, ctx: &Context, name: &str, owner: &str, parents: &[&str], paths: Vec<PathEntry>) {
    facade
        .add_lot(
            ctx,
            NewLotSpec {
                lot_name: name.to_string(),
                owner: owner.to_string(),
                parents: parents.iter().map(|s| s.to_string()).collect(),
                children: vec![],
                paths,
                management_policy_attrs: ManagementPolicyAttrs::default(),
            },
        )
        .unwrap();
}

#[test]
fn scenario_1_bootstrap() {
    let _guard = TEST_LOCK.lock().unwrap();
    let ctx = Context::new();
    let (_dir, facade) = open_facade(&ctx);

    add(&facade, &ctx, DEFAULT_LOT, "root", &[], vec![PathEntry { path: "/default/paths".into(), recursive: true }]);

    assert_eq!(facade.list_all_lots().unwrap(), vec![DEFAULT_LOT.to_string()]);
}

#[test]
fn scenario_2_insertion_splices_existing_edge() {
    let _guard = TEST_LOCK.lock().unwrap();
    let ctx = Context::new();
    let (_dir, facade) = open_facade(&ctx);

    add(&facade, &ctx, DEFAULT_LOT, "root", &[], vec![]);
    add(&facade, &ctx, "lot3", "root", &[DEFAULT_LOT], vec![]);
    add(&facade, &ctx, "lot4", "root", &["lot3"], vec![]);

    facade
        .add_lot(
            &ctx,
            NewLotSpec {
                lot_name: "lot5".into(),
                owner: "root".into(),
                parents: vec!["lot3".into()],
                children: vec!["lot4".into()],
                paths: vec![],
                management_policy_attrs: ManagementPolicyAttrs::default(),
            },
        )
        .unwrap();

    assert_eq!(facade.get_parents("lot4").unwrap(), vec!["lot5".to_string()]);
    assert!(facade.get_children("lot3").unwrap().contains(&"lot5".to_string()));
    assert_eq!(facade.get_parents("lot5").unwrap(), vec!["lot3".to_string()]);
}

#[test]
fn scenario_3_cycle_rejected_no_row_inserted() {
    let _guard = TEST_LOCK.lock().unwrap();
    let ctx = Context::new();
    let (_dir, facade) = open_facade(&ctx);

    add(&facade, &ctx, DEFAULT_LOT, "root", &[], vec![]);
    add(&facade, &ctx, "lot1", "root", &[DEFAULT_LOT], vec![]);
    add(&facade, &ctx, "lot2", "root", &["lot1"], vec![]);
    add(&facade, &ctx, "lot3", "root", &["lot2"], vec![]);
    add(&facade, &ctx, "lot4", "root", &["lot3"], vec![]);

    let err = facade
        .add_lot(
            &ctx,
            NewLotSpec {
                lot_name: "lot5".into(),
                owner: "root".into(),
                parents: vec!["lot4".into()],
                children: vec!["lot1".into()],
                paths: vec![],
                management_policy_attrs: ManagementPolicyAttrs::default(),
            },
        )
        .unwrap_err();
    assert!(matches!(err, LotError::InvariantViolation { .. }));
    assert!(!facade.list_all_lots().unwrap().contains(&"lot5".to_string()));
}

#[test]
fn scenario_4_path_normalization_and_lookup() {
    let _guard = TEST_LOCK.lock().unwrap();
    let ctx = Context::new();
    let (_dir, facade) = open_facade(&ctx);

    add(&facade, &ctx, DEFAULT_LOT, "root", &[], vec![]);
    add(
        &facade,
        &ctx,
        "lot_x",
        "root",
        &[DEFAULT_LOT],
        vec![PathEntry { path: "/a/b".into(), recursive: false }],
    );
    add(
        &facade,
        &ctx,
        "lot_y",
        "root",
        &[DEFAULT_LOT],
        vec![PathEntry { path: "/a/".into(), recursive: true }],
    );

    let dirs = facade.get_lot_dirs("lot_x").unwrap();
    assert_eq!(dirs, vec![PathEntry { path: "/a/b/".into(), recursive: false }]);

    assert_eq!(facade.get_lots_from_dir("/a/b", false).unwrap(), vec!["lot_x".to_string()]);
    assert_eq!(facade.get_lots_from_dir("/a/c", false).unwrap(), vec!["lot_y".to_string()]);
    assert_eq!(facade.get_lots_from_dir("/a/b/sub", false).unwrap(), vec!["lot_y".to_string()]);
}

#[test]
fn scenario_5_usage_dedup_across_two_lots() {
    let _guard = TEST_LOCK.lock().unwrap();
    let ctx = Context::new();
    let (_dir, facade) = open_facade(&ctx);

    add(&facade, &ctx, DEFAULT_LOT, "root", &[], vec![]);
    add(
        &facade,
        &ctx,
        "lot_d",
        "root",
        &[DEFAULT_LOT],
        vec![PathEntry { path: "/d".into(), recursive: false }],
    );
    add(
        &facade,
        &ctx,
        "lot_e",
        "root",
        &[DEFAULT_LOT],
        vec![PathEntry { path: "/d/e".into(), recursive: true }],
    );

    let tree = vec![DirUsageNode {
        path: "/d".into(),
        size_gb: 10.0,
        num_obj: 0,
        gb_being_written: 0.0,
        objects_being_written: 0,
        includes_subdirs: true,
        subdirs: vec![DirUsageNode {
            path: "e".into(),
            size_gb: 3.0,
            num_obj: 0,
            gb_being_written: 0.0,
            objects_being_written: 0,
            includes_subdirs: false,
            subdirs: vec![],
        }],
    }];
    facade.update_lot_usage_by_dir(&tree).unwrap();

    assert_eq!(facade.get_lot_usage("lot_d").unwrap().self_gb, 7.0);
    assert_eq!(facade.get_lot_usage("lot_e").unwrap().self_gb, 3.0);
}

#[test]
fn scenario_6_past_expiration() {
    let _guard = TEST_LOCK.lock().unwrap();
    let ctx = Context::new();
    let (_dir, facade) = open_facade(&ctx);

    add(&facade, &ctx, DEFAULT_LOT, "root", &[], vec![]);
    facade
        .add_lot(
            &ctx,
            NewLotSpec {
                lot_name: "soon".into(),
                owner: "root".into(),
                parents: vec![DEFAULT_LOT.into()],
                children: vec![],
                paths: vec![],
                management_policy_attrs: ManagementPolicyAttrs { expiration_time: 100, ..Default::default() },
            },
        )
        .unwrap();
    facade
        .add_lot(
            &ctx,
            NewLotSpec {
                lot_name: "later".into(),
                owner: "root".into(),
                parents: vec![DEFAULT_LOT.into()],
                children: vec![],
                paths: vec![],
                management_policy_attrs: ManagementPolicyAttrs {
                    expiration_time: 1_000_000_000,
                    ..Default::default()
                },
            },
        )
        .unwrap();

    let clock = Box::new(FixedNow(500));
    let facade2 = Facade::open_with_clock(&ctx, StoreConfig::default(), clock).unwrap();
    assert_eq!(facade2.get_lots_past_exp(false).unwrap(), vec!["soon".to_string()]);
}

struct FixedNow(i64);
impl lotman::ClockSource for FixedNow {
    fn now_millis(&self) -> i64 {
        self.0
    }
}
