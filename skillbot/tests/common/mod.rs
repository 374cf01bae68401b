#![allow(dead_code)]

use serde_json::Value;
use skillbot::{
    resolve, Collaborators, Interpreter, MissionReport, Program, RunConfig, SkillDocument,
    SkillLibrary,
};

pub fn doc(name: &str, value: Value) -> SkillDocument {
    SkillDocument::from_value(name, value).expect("fixture parses")
}

pub fn program(main: Value) -> Program {
    resolve(&doc("main", main), &SkillLibrary::new()).expect("fixture resolves")
}

/// Deterministic config with back-offs of one to two seconds.
pub fn test_config() -> RunConfig {
    let mut config = RunConfig::default().with_seed(42);
    config.recovery.min_retry_back_off_secs = 1;
    config.recovery.max_retry_back_off_secs = 2;
    config.work_dir = std::env::temp_dir().join("skillbot-tests");
    config
}

/// Step logs on the test writer; set RUST_LOG=debug to see them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn interpreter(main: Value, library: &SkillLibrary, collaborators: Collaborators) -> Interpreter {
    init_tracing();
    Interpreter::for_skill(&doc("main", main), library, collaborators, test_config())
        .expect("fixture builds")
}

pub async fn run(main: Value) -> (MissionReport, Interpreter) {
    run_with(main, Collaborators::headless()).await
}

pub async fn run_with(main: Value, collaborators: Collaborators) -> (MissionReport, Interpreter) {
    let mut interp = interpreter(main, &SkillLibrary::new(), collaborators);
    let report = interp.run().await.expect("mission runs");
    (report, interp)
}
