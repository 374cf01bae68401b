mod common;

use common::{doc, program};
use serde_json::json;
use skillbot::program::StubKind;
use skillbot::{resolve, Collaborators, Interpreter, Op, RunConfig, SkillError, SkillLibrary};

fn resolve_err(main: serde_json::Value) -> SkillError {
    resolve(&doc("main", main), &SkillLibrary::new()).unwrap_err()
}

#[test]
fn if_else_targets_point_past_their_stubs() {
    let p = program(json!({
        "step 5": {"type": "Check Condition", "condition": "x > 1"},
        "step 10": {"type": "Halt"},
        "step 15": {"type": "Stub", "stub_name": "else"},
        "step 20": {"type": "Halt"},
        "step 25": {"type": "Stub", "stub_name": "end condition"},
        "step 30": {"type": "Halt"}
    }));

    match &p.instructions[0].op {
        Op::CheckCondition { if_else, if_end, .. } => {
            assert_eq!(*if_else, 3);
            assert_eq!(*if_end, 5);
        }
        other => panic!("unexpected {other:?}"),
    }
    // the step before else jumps over the else branch
    assert_eq!(
        p.instructions[2].op,
        Op::Goto {
            target: 5,
            increment: None
        }
    );
}

#[test]
fn condition_without_else_uses_end_for_both_targets() {
    let p = program(json!({
        "step 1": {"type": "Check Condition", "condition": "flag"},
        "step 2": {"type": "Halt"},
        "step 3": {"type": "Stub", "stub_name": "end condition"}
    }));
    assert!(matches!(
        p.instructions[0].op,
        Op::CheckCondition {
            if_else: 3,
            if_end: 3,
            ..
        }
    ));
}

#[test]
fn counted_repeat_gets_hidden_counter_initialisation() {
    let p = program(json!({
        "step 10": {"type": "Repeat", "count": 3, "lc_name": "i"},
        "step 15": {"type": "Halt"},
        "step 20": {"type": "Stub", "stub_name": "end loop"}
    }));

    let init = &p.instructions[0];
    assert!(init.address.synthetic);
    match &init.op {
        Op::Action { kind, args } => {
            assert_eq!(kind, "Fill Data");
            assert_eq!(args["to"], "i");
            assert_eq!(args["from"], 0);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(matches!(&p.instructions[1].op, Op::Repeat { end: 4, counter, .. } if counter == "i"));
    assert_eq!(
        p.instructions[3].op,
        Op::Goto {
            target: 1,
            increment: Some("i".into())
        }
    );
}

#[test]
fn guarded_repeat_has_no_counter_init() {
    let p = program(json!({
        "step 10": {"type": "Repeat", "until": "not done"},
        "step 20": {"type": "Stub", "stub_name": "end loop"}
    }));
    assert!(matches!(p.instructions[0].op, Op::Repeat { end: 2, .. }));
    assert_eq!(
        p.instructions[1].op,
        Op::Goto {
            target: 0,
            increment: None
        }
    );
}

#[test]
fn break_jumps_past_innermost_loop() {
    let p = program(json!({
        "step 1": {"type": "Repeat", "until": "True"},
        "step 2": {"type": "Check Condition", "condition": "stop"},
        "step 3": {"type": "Stub", "stub_name": "break"},
        "step 4": {"type": "Stub", "stub_name": "end condition"},
        "step 5": {"type": "Stub", "stub_name": "end loop"},
        "step 6": {"type": "Halt"}
    }));
    assert_eq!(
        p.instructions[2].op,
        Op::Goto {
            target: 5,
            increment: None
        }
    );
}

#[test]
fn every_branch_target_exists_after_resolution() {
    let p = program(json!({
        "step 5": {"type": "Repeat", "count": "n", "lc_name": "k"},
        "step 10": {"type": "Check Condition", "condition": "k % 2 == 0"},
        "step 15": {"type": "Halt"},
        "step 20": {"type": "Stub", "stub_name": "else"},
        "step 25": {"type": "Repeat", "until": "False"},
        "step 30": {"type": "Stub", "stub_name": "end loop"},
        "step 35": {"type": "Stub", "stub_name": "end condition"},
        "step 40": {"type": "Stub", "stub_name": "end loop"}
    }));
    for instruction in &p.instructions {
        match &instruction.op {
            Op::CheckCondition { if_else, if_end, .. } => {
                assert!(*if_else <= p.len() && *if_end <= p.len());
            }
            Op::Repeat { end, .. } => assert!(*end <= p.len()),
            Op::Goto { target, .. } => assert!(*target < p.len()),
            Op::Stub(StubKind::Else | StubKind::EndCondition | StubKind::EndLoop) => {
                panic!("stub left unresolved at {}", instruction.address)
            }
            _ => {}
        }
    }
}

#[test]
fn function_definition_is_skipped_on_fall_through() {
    let p = program(json!({
        "step 5": {"type": "Stub", "stub_name": "start function", "func_name": "f", "fargs": "x"},
        "step 10": {"type": "Return", "val_var_name": "x"},
        "step 15": {"type": "Stub", "stub_name": "end function", "func_name": "f"},
        "step 20": {"type": "Call Function", "fname": "f", "fargs": "a", "output": "r"}
    }));
    assert_eq!(p.functions.get("f"), Some(&1));
    assert_eq!(
        p.instructions[0].op,
        Op::Goto {
            target: 3,
            increment: None
        }
    );
    assert!(matches!(
        &p.instructions[3].op,
        Op::CallFunction { entry: 1, param, .. } if param == "x"
    ));
}

#[test]
fn goto_accepts_step_labels_and_tags() {
    let p = program(json!({
        "step 5": {"type": "Goto", "goto": "step 20"},
        "step 10": {"type": "Goto", "goto": "retry"},
        "step 15": {"type": "Stub", "stub_name": "tag", "func_name": "retry"},
        "step 20": {"type": "Goto", "goto": 15}
    }));
    assert!(matches!(p.instructions[0].op, Op::Goto { target: 3, .. }));
    assert!(matches!(p.instructions[1].op, Op::Goto { target: 2, .. }));
    assert!(matches!(p.instructions[3].op, Op::Goto { target: 2, .. }));
}

#[test]
fn unmatched_stubs_are_structural_errors() {
    let err = resolve_err(json!({"step 1": {"type": "Stub", "stub_name": "else"}}));
    assert!(matches!(err, SkillError::UnmatchedStub { ref stub, .. } if stub == "else"));

    let err = resolve_err(json!({"step 1": {"type": "Stub", "stub_name": "end loop"}}));
    assert!(matches!(err, SkillError::UnmatchedStub { .. }));

    let err = resolve_err(json!({
        "step 1": {"type": "Check Condition", "condition": "a"},
        "step 2": {"type": "Stub", "stub_name": "end loop"}
    }));
    assert!(matches!(err, SkillError::UnmatchedStub { .. }));

    let err = resolve_err(json!({"step 1": {"type": "Stub", "stub_name": "break"}}));
    assert!(matches!(err, SkillError::UnmatchedStub { .. }));
}

#[test]
fn unclosed_constructs_are_reported_with_their_step() {
    let err = resolve_err(json!({
        "step 1": {"type": "Halt"},
        "step 7": {"type": "Repeat", "until": "x"}
    }));
    match err {
        SkillError::UnclosedConstruct { step } => assert_eq!(step, "main!step 7"),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn missing_call_targets_fail_at_resolve_time() {
    let err = resolve_err(json!({"step 1": {"type": "Call Function", "fname": "nope"}}));
    assert!(matches!(err, SkillError::MissingFunction(ref f) if f == "nope"));

    let err = resolve_err(json!({"step 1": {"type": "Use Skill", "skill_name": "ghost"}}));
    assert!(matches!(err, SkillError::MissingSkill(ref s) if s == "ghost"));

    let err = resolve_err(json!({"step 1": {"type": "Goto", "goto": "step 99"}}));
    assert!(matches!(err, SkillError::UnknownLabel { .. }));
}

#[test]
fn repeat_without_guard_or_count_is_invalid() {
    let err = resolve_err(json!({
        "step 1": {"type": "Repeat"},
        "step 2": {"type": "Stub", "stub_name": "end loop"}
    }));
    assert!(matches!(err, SkillError::InvalidStep { .. }));
}

#[test]
fn sub_skills_follow_main_and_return_implicitly() {
    let library = SkillLibrary::new().with(doc(
        "lib/sub",
        json!({"step 1": {"type": "Halt"}}),
    ));
    let main = doc(
        "main",
        json!({"step 1": {"type": "Use Skill", "skill_path": "lib", "skill_name": "sub"}}),
    );
    let p = resolve(&main, &library).unwrap();

    assert_eq!(p.instructions[1].op, Op::Finish);
    assert_eq!(p.skills.get("lib/sub"), Some(&2));
    assert!(matches!(p.instructions[0].op, Op::UseSkill { entry: 2, .. }));
    assert!(matches!(
        p.instructions[3].op,
        Op::Stub(StubKind::EndSkill { .. })
    ));
    assert_eq!(p.documents.len(), 2);
}

#[test]
fn exception_handler_is_recorded_per_document() {
    let p = program(json!({
        "step 1": {"type": "Halt"},
        "step 50": {"type": "Exception Handler", "cause": "net", "max_retries": 2},
        "step 55": {"type": "Wait", "time": 1},
        "step 60": {"type": "End Exception"}
    }));
    assert_eq!(p.exception_handler_for(0), Some(1));
    assert!(matches!(p.instructions[1].op, Op::ExceptionHandler { end: 4, .. }));
}

#[test]
fn unknown_step_types_are_rejected_unless_registered() {
    let main = json!({"step 1": {"type": "AMZ Scrape", "result": "rows"}});
    let err = Interpreter::new(program(main.clone()), Collaborators::headless(), RunConfig::default())
        .unwrap_err();
    assert!(matches!(err, SkillError::UnknownStepType { ref kind, .. } if kind == "AMZ Scrape"));

    let collaborators = Collaborators::headless()
        .with_external("AMZ Scrape", std::sync::Arc::new(skillbot::platforms::DryRunOp));
    assert!(Interpreter::new(program(main), collaborators, RunConfig::default()).is_ok());
}
