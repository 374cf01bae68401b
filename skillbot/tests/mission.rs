mod common;

use common::{doc, interpreter, test_config};
use serde_json::json;
use skillbot::{Collaborators, Interpreter, MissionStatus, SkillError, SkillLibrary};
use std::time::Duration;

fn endless_loop() -> serde_json::Value {
    json!({
        "step 1": {"type": "Create Data", "data_name": "n", "key_value": 0},
        "step 2": {"type": "Repeat", "until": "True"},
        "step 3": {"type": "Fill Data", "from": "n + 1", "to": "n"},
        "step 4": {"type": "Wait", "time": 1},
        "step 5": {"type": "Stub", "stub_name": "end loop"}
    })
}

#[tokio::test]
async fn cancel_before_start_runs_nothing() {
    let mut interp = interpreter(endless_loop(), &SkillLibrary::new(), Collaborators::headless());
    let handle = interp.handle();
    handle.cancel();

    let report = interp.run().await.unwrap();
    assert_eq!(report.status, MissionStatus::Cancelled);
    assert_eq!(report.steps_executed, 0);
}

#[tokio::test(start_paused = true)]
async fn cancel_stops_a_running_mission() {
    let mut interp = interpreter(endless_loop(), &SkillLibrary::new(), Collaborators::headless());
    let handle = interp.handle();

    let stopper = async {
        tokio::time::sleep(Duration::from_millis(5500)).await;
        handle.cancel();
    };
    let (report, ()) = tokio::join!(interp.run(), stopper);

    let report = report.unwrap();
    assert_eq!(report.status, MissionStatus::Cancelled);
    assert!(report.steps_executed > 0);
    let n = interp.symbols().value("n").as_i64().unwrap();
    assert!((5..=6).contains(&n), "n = {n}");
    assert!(interp.call_stack().is_empty());
}

#[tokio::test]
async fn pause_status_resume() {
    let mut interp = interpreter(
        json!({
            "step 1": {"type": "Create Data", "data_name": "a", "key_value": 1},
            "step 2": {"type": "Create Data", "data_name": "b", "key_value": 2}
        }),
        &SkillLibrary::new(),
        Collaborators::headless(),
    );
    let handle = interp.handle();
    assert!(handle.pause());

    let control = async {
        let progress = handle.status().await.expect("mission is alive");
        assert!(progress.paused);
        assert_eq!(progress.index, 0);
        assert_eq!(progress.steps_executed, 0);
        assert_eq!(progress.address, "main!step 1");
        assert!(handle.resume());
    };
    let (report, ()) = tokio::join!(interp.run(), control);

    assert_eq!(report.unwrap().status, MissionStatus::Completed);
    assert_eq!(interp.symbols().value("b"), json!(2));
}

#[tokio::test(start_paused = true)]
async fn step_budget_fails_runaway_missions() {
    let mut config = test_config();
    config.max_steps = Some(10);
    let mut interp = Interpreter::for_skill(
        &doc("main", endless_loop()),
        &SkillLibrary::new(),
        Collaborators::headless(),
        config,
    )
    .unwrap();

    let report = interp.run().await.unwrap();
    assert_eq!(report.status, MissionStatus::Failed);
    assert_eq!(report.steps_executed, 10);
    assert_eq!(report.last_error.as_deref(), Some("step budget of 10 exhausted"));
}

#[tokio::test]
async fn jumping_out_of_a_function_leaves_frames_behind() {
    let mut interp = interpreter(
        json!({
            "step 1": {"type": "Stub", "stub_name": "start function", "func_name": "f"},
            "step 2": {"type": "Goto", "goto": "step 10"},
            "step 3": {"type": "Stub", "stub_name": "end function", "func_name": "f"},
            "step 5": {"type": "Call Function", "fname": "f"},
            "step 10": {"type": "Halt", "reason": "escaped"}
        }),
        &SkillLibrary::new(),
        Collaborators::headless(),
    );
    let err = interp.run().await.unwrap_err();
    assert!(matches!(err, SkillError::NonEmptyCallStack(4)));
}

#[tokio::test]
async fn report_serialises_with_snake_case_status() {
    let mut interp = interpreter(
        json!({"step 1": {"type": "Halt"}}),
        &SkillLibrary::new(),
        Collaborators::headless(),
    );
    let report = interp.run().await.unwrap();
    let value = serde_json::to_value(&report).unwrap();
    assert_eq!(value["status"], "completed");
    assert_eq!(value["steps_executed"], 2);
}
