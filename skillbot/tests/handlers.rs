mod common;

use common::{run, run_with};
use serde_json::json;
use skillbot::platforms::{DesktopAction, DryRunOp, HeadlessDesktop, ScriptedScreen, StaticScraper};
use skillbot::symbols::SCROLL_RESOLUTION;
use skillbot::{Collaborators, MissionStatus, Point, ScreenRecord, WindowInfo, WindowRect};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn desktop(x: i64, y: i64, width: i64, height: i64) -> Arc<HeadlessDesktop> {
    Arc::new(HeadlessDesktop::new(WindowRect {
        x,
        y,
        width,
        height,
    }))
}

#[tokio::test]
async fn fill_data_edits_lists_and_mappings() {
    let (report, interp) = run(json!({
        "step 1": {"type": "Create Data", "data_name": "items", "key_value": [1, 2, 3]},
        "step 2": {"type": "Create Data", "data_name": "meta", "key_value": {"a": 1}},
        "step 3": {"type": "Fill Data", "fill_type": "prepend", "from": 0, "to": "items"},
        "step 4": {"type": "Fill Data", "fill_type": "merge", "from": [4], "to": "items"},
        "step 5": {"type": "Fill Data", "fill_type": "pop", "from": 0, "to": "items", "result": "first"},
        "step 6": {"type": "Fill Data", "fill_type": "pop", "to": "items", "result": "last"},
        "step 7": {"type": "Fill Data", "fill_type": "merge", "from": {"b": 2}, "to": "meta"},
        "step 8": {"type": "Fill Data", "fill_type": "pop_key", "from": "a", "to": "meta", "result": "a"},
        "step 9": {"type": "Fill Data", "fill_type": "assign", "from": 3, "to": "meta[\"c\"]"},
        "step 10": {"type": "Fill Data", "fill_type": "copy", "from": "items", "to": "backup"},
        "step 11": {"type": "Fill Data", "fill_type": "clear", "to": "items"},
        "step 12": {"type": "Fill Data", "fill_type": "append", "from": "len(backup)", "to": "fresh"}
    }))
    .await;

    assert_eq!(report.status, MissionStatus::Completed);
    assert!(report.last_error.is_none(), "{:?}", report.last_error);
    let symbols = interp.symbols();
    assert_eq!(symbols.value("first"), json!(0));
    assert_eq!(symbols.value("last"), json!(4));
    assert_eq!(symbols.value("a"), json!(1));
    assert_eq!(symbols.value("meta"), json!({"b": 2, "c": 3}));
    assert_eq!(symbols.value("backup"), json!([1, 2, 3]));
    assert_eq!(symbols.value("items"), json!([]));
    assert_eq!(symbols.value("fresh"), json!([3]));
}

#[tokio::test]
async fn create_data_with_key_wraps_value() {
    let (_, interp) = run(json!({
        "step 1": {"type": "Create Data", "data_name": "order", "key_name": "lines", "key_value": "[1, 2]"},
        "step 2": {"type": "Create Data", "data_name": "raw", "key_value": "[not json"}
    }))
    .await;
    assert_eq!(interp.symbols().value("order"), json!({"lines": [1, 2]}));
    assert_eq!(interp.symbols().value("raw"), json!("[not json"));
    assert!(interp.symbols().mission_vars().contains(&"order".to_string()));
}

#[tokio::test]
async fn failed_step_is_tagged_and_mission_continues() {
    let (report, interp) = run(json!({
        "step 1": {"type": "Create Data", "data_name": "empty", "key_value": []},
        "step 2": {"type": "Fill Data", "fill_type": "pop", "to": "empty", "result": "x"},
        "step 3": {"type": "Create Data", "data_name": "done", "key_value": true}
    }))
    .await;

    assert_eq!(report.status, MissionStatus::Completed);
    let tag = report.last_error.expect("failure recorded");
    assert!(tag.starts_with("ErrorFillData:1: "), "{tag}");
    assert_eq!(interp.symbols().value("done"), json!(true));
}

#[tokio::test]
async fn failed_condition_takes_the_else_branch() {
    let (report, interp) = run(json!({
        "step 1": {"type": "Check Condition", "condition": "1 / 0"},
        "step 2": {"type": "Create Data", "data_name": "branch", "key_value": "then"},
        "step 3": {"type": "Stub", "stub_name": "else"},
        "step 4": {"type": "Create Data", "data_name": "branch", "key_value": "else"},
        "step 5": {"type": "Stub", "stub_name": "end condition"}
    }))
    .await;
    assert!(report
        .last_error
        .as_deref()
        .is_some_and(|e| e.starts_with("ErrorCheckCondition:0:")));
    assert_eq!(interp.symbols().value("branch"), json!("else"));
}

#[tokio::test]
async fn data_files_round_trip_through_disk() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("out");
    let file = out.join("order.json");
    let file_link = file.display().to_string();

    let (report, interp) = run(json!({
        "step 1": {"type": "Create Data", "data_name": "order", "key_value": {"sku": "A-1", "qty": 2}},
        "step 2": {"type": "Save Data", "data_name": "order", "file_link": file_link},
        "step 3": {"type": "Load Data", "data_name": "loaded", "file_link": file_link},
        "step 4": {"type": "Check Existence", "fntype": "file", "file": file_link, "result": "has_file"},
        "step 5": {"type": "Check Existence", "fntype": "dir", "file": out.display().to_string(), "result": "has_dir"},
        "step 6": {"type": "Check Existence", "fntype": "file", "file": out.join("nope.json").display().to_string(), "result": "has_other"},
        "step 7": {"type": "List Dir", "dir": out.display().to_string(), "extension": ".json", "result": "listing"}
    }))
    .await;

    assert!(report.last_error.is_none(), "{:?}", report.last_error);
    let symbols = interp.symbols();
    assert_eq!(symbols.value("loaded"), json!({"sku": "A-1", "qty": 2}));
    assert_eq!(symbols.value("has_file"), json!(true));
    assert_eq!(symbols.value("has_dir"), json!(true));
    assert_eq!(symbols.value("has_other"), json!(false));
    assert_eq!(symbols.value("listing"), json!([file_link]));
}

#[tokio::test]
async fn file_steps_create_write_read_and_delete() {
    let dir = TempDir::new().unwrap();
    let reports = dir.path().join("reports");
    let notes = reports.join("notes.txt").display().to_string();
    let rows = reports.join("rows.json").display().to_string();

    let (report, interp) = run(json!({
        "step 1": {"type": "Create Data", "data_name": "base", "key_value": dir.path().display().to_string()},
        "step 2": {"type": "Create Dir", "dir": "base + '/reports'", "name_type": "expr", "result": "made"},
        "step 3": {"type": "Create Data", "data_name": "lines", "key_value": ["a", "b"]},
        "step 4": {"type": "Write File", "filename": notes, "filetype": "txt", "datasource": "lines", "mode": "append", "result": "w1"},
        "step 5": {"type": "Write File", "filename": notes, "filetype": "txt", "datasource": "lines", "mode": "append", "result": "w2"},
        "step 6": {"type": "Create Data", "data_name": "table", "key_value": {"rows": [1, 2]}},
        "step 7": {"type": "Write File", "filename": rows, "filetype": "json", "datasource": "table", "mode": "overwrite", "result": "w3"},
        "step 8": {"type": "Read File", "filename": rows, "filetype": "json", "datasink": "loaded", "flag": "read_ok"},
        "step 9": {"type": "Read File", "filename": notes, "filetype": "txt", "datasink": "text", "flag": "text_ok"},
        "step 10": {"type": "Delete File", "filename": notes, "result": "deleted"},
        "step 11": {"type": "Read File", "filename": notes, "datasink": "gone", "flag": "gone_ok"},
        "step 12": {"type": "Delete File", "filename": notes, "result": "deleted_again"}
    }))
    .await;

    assert!(report.last_error.is_none(), "{:?}", report.last_error);
    let symbols = interp.symbols();
    assert!(reports.is_dir());
    assert_eq!(symbols.value("made"), json!(reports.display().to_string()));
    assert_eq!(symbols.value("w1"), json!(true));
    assert_eq!(symbols.value("w3"), json!(true));
    assert_eq!(symbols.value("loaded"), json!({"rows": [1, 2]}));
    assert_eq!(symbols.value("read_ok"), json!(true));
    assert_eq!(symbols.value("text"), json!("abab"));
    assert_eq!(symbols.value("deleted"), json!(true));
    assert_eq!(symbols.value("gone"), json!(""));
    assert_eq!(symbols.value("gone_ok"), json!(false));
    assert_eq!(symbols.value("deleted_again"), json!(true));
    assert!(!std::path::Path::new(&notes).exists());
}

#[tokio::test(start_paused = true)]
async fn wait_until_returns_on_events_or_times_out() {
    let started = tokio::time::Instant::now();
    let (report, interp) = run(json!({
        "step 1": {"type": "Create Data", "data_name": "ready", "key_value": true},
        "step 2": {"type": "Wait Until", "events": ["ready"], "events_relation": "all", "time_out": 30, "result": "r1", "flag": "f1"},
        "step 3": {"type": "Wait Until", "events": ["ready", "never"], "events_relation": "all", "time_out": 5, "result": "r2", "flag": "f2"},
        "step 4": {"type": "Wait Until", "events": "never, ready", "events_relation": "any", "time_out": 5, "result": "r3", "flag": "f3"}
    }))
    .await;
    let waited = started.elapsed();

    assert_eq!(report.status, MissionStatus::Completed);
    let symbols = interp.symbols();
    assert_eq!(symbols.value("r1"), json!("Completed:Event Received"));
    assert_eq!(symbols.value("f1"), json!(true));
    assert_eq!(symbols.value("r2"), json!("Error:Timed Out"));
    assert_eq!(symbols.value("f2"), json!(false));
    assert_eq!(symbols.value("f3"), json!(true));
    // only the unmet `all` waited out its time-out
    assert!(waited >= Duration::from_secs(5) && waited < Duration::from_secs(6), "{waited:?}");
}

#[tokio::test]
async fn list_dir_sorts_by_name_in_both_orders() {
    let dir = TempDir::new().unwrap();
    for name in ["b.csv", "a.csv", "c.txt"] {
        std::fs::write(dir.path().join(name), "x").unwrap();
    }
    let root = dir.path().display().to_string();

    let (_, interp) = run(json!({
        "step 1": {"type": "List Dir", "dir": root, "extension": "csv", "result": "asc"},
        "step 2": {"type": "List Dir", "dir": root, "extension": "csv", "sort_order": "max-min", "result": "desc"},
        "step 3": {"type": "List Dir", "dir": root, "result": "all"}
    }))
    .await;

    let name = |p: &serde_json::Value| {
        std::path::Path::new(p.as_str().unwrap())
            .file_name()
            .unwrap()
            .to_string_lossy()
            .into_owned()
    };
    let asc: Vec<String> = interp.symbols().value("asc").as_array().unwrap().iter().map(name).collect();
    let desc: Vec<String> = interp.symbols().value("desc").as_array().unwrap().iter().map(name).collect();
    assert_eq!(asc, vec!["a.csv", "b.csv"]);
    assert_eq!(desc, vec!["b.csv", "a.csv"]);
    assert_eq!(interp.symbols().value("all").as_array().map(Vec::len), Some(3));
}

#[tokio::test]
async fn text_to_number_and_inline_extern() {
    let (report, interp) = run(json!({
        "step 1": {"type": "Create Data", "data_name": "price_text", "key_value": "$1,299 each"},
        "step 2": {"type": "Text To Number", "intext": "price_text", "numvar": "price"},
        "step 3": {"type": "Create Data", "data_name": "a", "key_value": 5},
        "step 4": {"type": "Call Extern", "entity": "in_line", "file": "total = a * 3; total + 1", "output": "res"}
    }))
    .await;

    assert!(report.last_error.is_none(), "{:?}", report.last_error);
    assert_eq!(interp.symbols().value("price"), json!(1299));
    assert_eq!(interp.symbols().value("total"), json!(15));
    assert_eq!(interp.symbols().value("res"), json!(16));
}

#[tokio::test]
async fn mouse_click_offsets_by_window_origin() {
    let desk = desktop(100, 50, 800, 600);
    let collaborators = Collaborators::headless().with_desktop(desk.clone());
    let click = json!({"type": "Mouse Click", "action": "Single Click", "target_type": "direct", "target_name": [10, 40, 30, 80]});

    let (report, interp) = run_with(
        json!({
            "step 1": click,
            "step 2": click,
            "step 3": click,
            "step 4": click
        }),
        collaborators,
    )
    .await;

    assert_eq!(report.status, MissionStatus::Completed);
    let actions = desk.actions();
    assert_eq!(
        actions[0],
        DesktopAction::MoveTo {
            point: Point::new(160, 70)
        }
    );
    assert_eq!(
        actions[1],
        DesktopAction::Click {
            point: Point::new(160, 70),
            kind: "single".into()
        }
    );
    // one rollback point per input step, oldest evicted
    let pages = interp.recovery().pages();
    assert_eq!(pages.len(), 3);
    assert_eq!(pages.top().map(|f| f.address), Some(4));
}

#[tokio::test]
async fn mouse_click_finds_anchor_on_screen() {
    let desk = desktop(100, 50, 800, 600);
    let screen = Arc::new(ScriptedScreen::new(vec![vec![
        ScreenRecord::new("Buy", "anchor text", [0, 0, 20, 20]),
        ScreenRecord::new("Buy", "button", [200, 300, 240, 400]),
    ]]));
    let collaborators = Collaborators::headless()
        .with_desktop(desk.clone())
        .with_screen(screen);

    let (report, _) = run_with(
        json!({
            "step 1": {"type": "Extract Info", "data_sink": "screen"},
            "step 2": {"type": "Mouse Click", "action": "Double Click", "action_args": 0.1, "target_name": "Buy",
                       "target_type": "button", "offset_from": "left", "offset": [10, 0]}
        }),
        collaborators,
    )
    .await;

    assert!(report.last_error.is_none(), "{:?}", report.last_error);
    let clicks: Vec<DesktopAction> = desk
        .actions()
        .into_iter()
        .filter(|a| matches!(a, DesktopAction::Click { .. }))
        .collect();
    assert_eq!(
        clicks,
        vec![DesktopAction::Click {
            point: Point::new(410, 270),
            kind: "double".into()
        }]
    );
}

#[tokio::test]
async fn missing_click_target_fails_the_step() {
    let (report, _) = run(json!({
        "step 1": {"type": "Mouse Click", "target_name": "Ghost"}
    }))
    .await;
    assert!(report
        .last_error
        .as_deref()
        .is_some_and(|e| e.starts_with("ErrorMouseClick:0:") && e.contains("Ghost")));
}

#[tokio::test]
async fn key_input_presses_hotkeys_and_rejects_big_chords() {
    let desk = desktop(0, 0, 800, 600);
    let collaborators = Collaborators::headless().with_desktop(desk.clone());
    let (report, _) = run_with(
        json!({
            "step 1": {"type": "Key Input", "action_value": "Ctrl, A"},
            "step 2": {"type": "Key Input", "action_value": "ctrl,shift,alt,win,k"},
            "step 3": {"type": "Key Input", "action_value": "enter"}
        }),
        collaborators,
    )
    .await;

    assert_eq!(report.status, MissionStatus::Completed);
    assert!(report
        .last_error
        .as_deref()
        .is_some_and(|e| e.starts_with("ErrorKeyInput:1:")));
    assert_eq!(
        desk.actions(),
        vec![
            DesktopAction::Hotkey {
                keys: vec!["ctrl".into(), "a".into()]
            },
            DesktopAction::Press {
                key: "enter".into()
            },
        ]
    );
}

#[tokio::test]
async fn screen_scroll_converts_percent_to_units() {
    let desk = desktop(0, 0, 800, 600);
    let collaborators = Collaborators::headless().with_desktop(desk.clone());
    let (_, _) = run_with(
        json!({
            "step 1": {"type": "Mouse Scroll", "action": "scroll down", "amount": 50, "unit": "screen"},
            "step 2": {"type": "Mouse Scroll", "action": "scroll up", "amount": 3}
        }),
        collaborators,
    )
    .await;
    assert_eq!(
        desk.actions(),
        vec![
            DesktopAction::Scroll { units: -300 },
            DesktopAction::Scroll { units: 3 }
        ]
    );
}

#[tokio::test]
async fn search_scroll_brings_target_to_requested_height() {
    let desk = desktop(0, 0, 800, 1000);
    let screen = Arc::new(ScriptedScreen::new(vec![vec![ScreenRecord::new(
        "Reviews",
        "anchor text",
        [900, 100, 940, 300],
    )]]));
    let collaborators = Collaborators::headless()
        .with_desktop(desk.clone())
        .with_screen(screen);

    let (_, interp) = run_with(
        json!({
            "step 1": {"type": "Extract Info", "data_sink": "screen"},
            "step 2": {"type": "Search Scroll", "screen": "screen", "target": "Reviews", "target_loc": 50, "flag": "scrolled"},
            "step 3": {"type": "Search Scroll", "screen": "screen", "target": "Missing", "flag": "other"}
        }),
        collaborators,
    )
    .await;

    assert!(desk.actions().contains(&DesktopAction::Scroll { units: -420 }));
    assert_eq!(interp.symbols().value("scrolled"), json!(true));
    assert_eq!(interp.symbols().value("other"), json!(false));
    assert_eq!(interp.recovery().pages().top().map(|f| f.address), Some(2));
}

#[tokio::test(start_paused = true)]
async fn random_wait_stays_in_range() {
    let started = tokio::time::Instant::now();
    let (report, _) = run(json!({
        "step 1": {"type": "Wait", "random_min": 2, "random_max": 4}
    }))
    .await;
    let waited = started.elapsed();
    assert_eq!(report.status, MissionStatus::Completed);
    assert!(waited >= Duration::from_secs(2) && waited < Duration::from_secs(4), "{waited:?}");
}

#[tokio::test(start_paused = true)]
async fn fixed_wait_accepts_expressions() {
    let started = tokio::time::Instant::now();
    run(json!({
        "step 1": {"type": "Create Data", "data_name": "secs", "key_value": 3},
        "step 2": {"type": "Wait", "time": "secs * 2"}
    }))
    .await;
    assert!(started.elapsed() >= Duration::from_secs(6));
}

#[tokio::test(start_paused = true)]
async fn unrepresentable_waits_fail_the_step() {
    let (report, interp) = run(json!({
        "step 1": {"type": "Wait", "time": "1e400"},
        "step 2": {"type": "Wait", "random_min": 0, "random_max": "1e400"},
        "step 3": {"type": "Create Data", "data_name": "after", "key_value": 1}
    }))
    .await;
    assert_eq!(report.status, MissionStatus::Completed);
    assert!(report
        .last_error
        .as_deref()
        .is_some_and(|e| e.starts_with("ErrorWait:1:")));
    assert_eq!(interp.symbols().value("after"), json!(1));
}

#[tokio::test]
async fn mouse_move_is_relative_or_absolute() {
    let desk = desktop(0, 0, 800, 600);
    let (report, _) = run_with(
        json!({
            "step 1": {"type": "Mouse Move", "x_amount_var": 15, "y_amount_var": -5},
            "step 2": {"type": "Create Data", "data_name": "dest", "key_value": [400, 300]},
            "step 3": {"type": "Mouse Move", "x_destination_var": "dest[0]", "y_destination_var": "dest[1]"},
            "step 4": {"type": "Mouse Move", "x_destination_var": 10}
        }),
        Collaborators::headless().with_desktop(desk.clone()),
    )
    .await;

    assert_eq!(
        desk.actions(),
        vec![
            DesktopAction::MoveBy { dx: 15, dy: -5 },
            DesktopAction::MoveTo {
                point: Point::new(400, 300)
            },
        ]
    );
    assert!(report
        .last_error
        .as_deref()
        .is_some_and(|e| e.starts_with("ErrorMouseMove:3:")));
}

#[tokio::test]
async fn windows_are_listed_and_raised_by_title() {
    let orders = WindowRect {
        x: 0,
        y: 0,
        width: 1280,
        height: 900,
    };
    let notes = WindowRect {
        x: 100,
        y: 80,
        width: 400,
        height: 300,
    };
    let desk = Arc::new(HeadlessDesktop::default().with_windows(vec![
        WindowInfo::new("Orders - Browser", orders),
        WindowInfo::new("Notes", notes),
    ]));
    let (report, interp) = run_with(
        json!({
            "step 1": {"type": "Get Windows Info", "nth_var": "", "results_var": "wins", "flag_var": "listed"},
            "step 2": {"type": "Get Windows Info", "nth_var": 1, "results_var": "second", "flag_var": "picked"},
            "step 3": {"type": "Create Data", "data_name": "target", "key_value": "Notes"},
            "step 4": {"type": "Bring Window To Front", "title_var": "target", "flag_var": "front"},
            "step 5": {"type": "Bring Window To Front", "title_var": "'Missing'", "flag_var": "missing"}
        }),
        Collaborators::headless().with_desktop(desk.clone()),
    )
    .await;

    let symbols = interp.symbols();
    assert_eq!(symbols.value("wins").as_array().map(Vec::len), Some(2));
    assert_eq!(symbols.value("listed"), json!(true));
    assert_eq!(
        symbols.value("second"),
        json!([{"title": "Notes", "rect": {"x": 100, "y": 80, "width": 400, "height": 300}}])
    );
    assert_eq!(symbols.value("front"), json!(true));
    assert_eq!(symbols.value("missing"), json!(false));
    assert_eq!(
        desk.actions(),
        vec![DesktopAction::BringToFront {
            title: "Notes".into()
        }]
    );
    assert!(report
        .last_error
        .as_deref()
        .is_some_and(|e| e.starts_with("ErrorBringWindowToFront:4:")));
}

#[tokio::test]
async fn calibrated_resolution_drives_screen_scrolls() {
    let desk = desktop(0, 0, 800, 1000);
    let (report, interp) = run_with(
        json!({
            "step 1": {"type": "Create Data", "data_name": "prev", "key_value": [50, 510]},
            "step 2": {"type": "Create Data", "data_name": "screen", "key_value": [
                {"name": "Order total", "type": "info", "loc": [300, 10, 320, 100]}
            ]},
            "step 3": {"type": "Calibrate Scroll", "screen": "screen", "marker": "Order total", "amount": 4, "last_record": "prev"},
            "step 4": {"type": "Mouse Scroll", "action": "scroll down", "amount": 50, "unit": "screen"},
            "step 5": {"type": "Calibrate Scroll", "screen": "screen", "marker": "Absent", "amount": 4, "last_record": "prev"}
        }),
        Collaborators::headless().with_desktop(desk.clone()),
    )
    .await;

    // |310 - 510| px over 4 units
    assert_eq!(interp.symbols().value(SCROLL_RESOLUTION), json!(50.0));
    assert!(desk.actions().contains(&DesktopAction::Scroll { units: -10 }));
    assert!(report
        .last_error
        .as_deref()
        .is_some_and(|e| e.starts_with("ErrorCalibrateScroll:4:")));
}

#[tokio::test]
async fn text_input_reads_variables_and_lists() {
    let desk = desktop(0, 0, 800, 600);
    let collaborators = Collaborators::headless().with_desktop(desk.clone());
    run_with(
        json!({
            "step 1": {"type": "Create Data", "data_name": "name", "key_value": "Ada"},
            "step 2": {"type": "Text Input", "txt_ref_type": "var", "text": "name", "key_after": "Enter"},
            "step 3": {"type": "Create Data", "data_name": "parts", "key_value": ["x", "y"]},
            "step 4": {"type": "Text Input", "txt_ref_type": "expr", "text": "parts + ['z']"}
        }),
        collaborators,
    )
    .await;

    assert_eq!(
        desk.actions(),
        vec![
            DesktopAction::TypeText {
                text: "Ada".into(),
                interval_ms: 0
            },
            DesktopAction::Press {
                key: "enter".into()
            },
            DesktopAction::TypeText {
                text: "xyz".into(),
                interval_ms: 0
            },
        ]
    );
}

#[tokio::test]
async fn word_line_and_text_line_location() {
    let screen = Arc::new(ScriptedScreen::new(vec![vec![
        ScreenRecord::new("line-1", "text line", [100, 20, 120, 400]).with_text("Subtotal: $40.00"),
        ScreenRecord::new("line-2", "text line", [130, 20, 150, 400]).with_text("Total: $42.50"),
    ]]));
    let collaborators = Collaborators::headless().with_screen(screen);

    let (report, interp) = run_with(
        json!({
            "step 1": {"type": "Extract Info", "data_sink": "screen"},
            "step 2": {"type": "Search Word Line", "screen": "screen", "patterns": "^Total: \\$\\d+\\.\\d{2}$", "result": "lines", "status": "has_total"},
            "step 3": {"type": "Search Word Line", "screen": "screen", "patterns": ["Subtotal", "Tax"], "logic": "all", "result": "both", "status": "has_both"},
            "step 4": {"type": "Text Line Location Record", "screen": "screen", "text": "Total:", "to": "total_loc"}
        }),
        collaborators,
    )
    .await;

    assert!(report.last_error.is_none(), "{:?}", report.last_error);
    let symbols = interp.symbols();
    assert_eq!(symbols.value("has_total"), json!(true));
    assert_eq!(symbols.value("lines")[0]["matches"], json!(["Total: $42.50"]));
    assert_eq!(symbols.value("has_both"), json!(false));
    // matching is case sensitive, so "Subtotal:" does not count
    assert_eq!(symbols.value("total_loc"), json!([130, 20, 150, 400]));
}

#[tokio::test]
async fn save_html_scrapes_the_saved_page() {
    let dir = TempDir::new().unwrap();
    let page = dir.path().join("pages").join("p.html");
    let collaborators = Collaborators::headless()
        .with_scraper(Arc::new(StaticScraper::new(json!({"rows": [{"sku": "A-1"}]}))));

    let (report, interp) = run_with(
        json!({
            "step 1": {"type": "Save Html", "local": page.display().to_string(), "template": "orders", "data_sink": "table"}
        }),
        collaborators,
    )
    .await;

    assert!(report.last_error.is_none(), "{:?}", report.last_error);
    assert!(dir.path().join("pages").is_dir());
    assert_eq!(interp.symbols().value("table"), json!({"rows": [{"sku": "A-1"}]}));
}

#[tokio::test]
async fn open_app_passes_arguments() {
    let desk = desktop(0, 0, 800, 600);
    let collaborators = Collaborators::headless().with_desktop(desk.clone());
    let (_, interp) = run_with(
        json!({
            "step 1": {"type": "Create Data", "data_name": "url", "key_value": "https://example.com"},
            "step 2": {"type": "Open App", "app_type": "browser", "app_link": "firefox", "cargs_type": "var", "cargs": "url", "result": "opened"}
        }),
        collaborators,
    )
    .await;

    assert_eq!(
        desk.actions(),
        vec![DesktopAction::OpenApp {
            link: "firefox".into(),
            args: vec!["https://example.com".into()]
        }]
    );
    assert_eq!(interp.symbols().value("opened"), json!(true));
}

#[tokio::test]
async fn registered_external_step_runs() {
    let collaborators = Collaborators::headless().with_external("AMZ Scrape", Arc::new(DryRunOp));
    let (report, interp) = run_with(
        json!({"step 1": {"type": "AMZ Scrape", "result": "rows"}}),
        collaborators,
    )
    .await;
    assert_eq!(report.status, MissionStatus::Completed);
    assert!(interp.symbols().contains("rows"));
}
